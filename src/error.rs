//! Error types for chaos-dns.

use thiserror::Error;

use crate::resolver::ResolveError;
use crate::selector::PatternError;

/// Errors that can occur in the chaos DNS service.
#[derive(Debug, Error)]
pub enum ChaosDnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A chaos rule carried a malformed name pattern. The whole install is
    /// rejected and the registry is left unchanged.
    #[error("invalid pattern in rule {rule:?}: {source}")]
    Pattern {
        /// Name of the rule being installed.
        rule: String,
        /// Why compilation failed.
        source: PatternError,
    },

    /// A target pod could not be resolved to an IP while installing a rule.
    /// The whole install is rejected and the registry is left unchanged.
    #[error("failed to resolve pod {namespace}/{name}: {source}")]
    Resolve {
        /// Target pod namespace.
        namespace: String,
        /// Target pod name.
        name: String,
        /// The underlying resolver failure.
        source: ResolveError,
    },

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Control protocol encode/decode failure.
    #[error("control codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// The control server rejected a request; carries the server's error text.
    #[error("control request rejected: {0}")]
    Rejected(String),

    /// Kubernetes client setup error.
    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// A fault was deliberately injected for this query. Upstream logging can
    /// use this to tell injection apart from a real server failure; it must
    /// not be retried.
    #[error("dns fault injected for pod {namespace}/{name} by rule {rule}")]
    FaultInjected {
        /// Namespace of the pod the fault targets.
        namespace: String,
        /// Name of the pod the fault targets.
        name: String,
        /// The rule that requested the fault.
        rule: String,
    },

    /// The query did not match chaos and there is no next handler to
    /// delegate to.
    #[error("no next handler in chain")]
    NoNextHandler,
}
