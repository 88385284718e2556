//! Concurrent in-memory registry of live chaos rules.
//!
//! The registry keeps three indices under one reader-writer lock:
//! rule-name -> rule (for cancel), namespace -> pod -> binding (cluster
//! identity), and pod-IP -> binding (the DNS hot path, since an inbound
//! packet only carries a source address). Pod IPs drift as pods are
//! recreated, so bindings are lazily re-resolved once they grow older than
//! the freshness threshold.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ChaosDnsError;
use crate::metrics::{self, RefreshOutcome};
use crate::resolver::PodResolver;
use crate::selector::Selector;

/// Bindings older than this are re-resolved on the next lookup.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(10);

/// Fault to inject for matching queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultAction {
    /// Answer with SERVFAIL.
    Error,
    /// Answer with a randomized bogus address.
    Random,
}

impl FaultAction {
    /// Wire/log spelling of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultAction::Error => "error",
            FaultAction::Random => "random",
        }
    }
}

/// A (namespace, name) pod reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
}

impl PodRef {
    /// Convenience constructor.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// A chaos rule as submitted by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosRule {
    /// Rule name, unique across live rules.
    pub name: String,
    /// Fault to inject.
    pub action: FaultAction,
    /// Glob patterns over queried names; empty means every name.
    pub patterns: Vec<String>,
    /// Pods the rule applies to.
    pub targets: Vec<PodRef>,
}

/// Derived per-(rule, target) state, indexed by both cluster identity and
/// observed pod IP.
#[derive(Debug, Clone)]
pub struct PodBinding {
    /// Rule that installed this binding.
    pub rule: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Fault to inject.
    pub action: FaultAction,
    /// Compiled pattern selector; `None` matches every name.
    pub selector: Option<Arc<Selector>>,
    /// Pod IP at the last resolution.
    pub observed_ip: IpAddr,
    last_refresh: Instant,
}

impl PodBinding {
    /// Whether a queried name falls under this binding's rule.
    pub fn matches(&self, qname: &str) -> bool {
        match &self.selector {
            Some(selector) => selector.matches(qname),
            None => true,
        }
    }

    /// Time since the pod IP was last fetched from the cluster.
    pub fn age(&self) -> Duration {
        self.last_refresh.elapsed()
    }
}

#[derive(Default)]
struct RegistryInner {
    /// rule-name -> rule, for cancel.
    rules: HashMap<String, ChaosRule>,
    /// namespace -> pod-name -> binding.
    by_target: HashMap<String, HashMap<String, PodBinding>>,
    /// pod-IP -> owning (namespace, name); at most one owner per IP.
    by_ip: HashMap<IpAddr, PodRef>,
}

/// Thread-safe registry handle; clones share the same state.
#[derive(Clone)]
pub struct ChaosRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    resolver: Arc<dyn PodResolver>,
    refresh_threshold: Duration,
}

impl ChaosRegistry {
    /// New empty registry with the default freshness threshold.
    pub fn new(resolver: Arc<dyn PodResolver>) -> Self {
        Self::with_refresh_threshold(resolver, DEFAULT_REFRESH_THRESHOLD)
    }

    /// New empty registry with a custom freshness threshold.
    pub fn with_refresh_threshold(resolver: Arc<dyn PodResolver>, threshold: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            resolver,
            refresh_threshold: threshold,
        }
    }

    /// Install a rule: compile its patterns, resolve every target pod, then
    /// index the resulting bindings atomically. Any compile or resolve
    /// failure aborts the whole call with the registry unchanged.
    ///
    /// A target already bound by another rule is superseded. Re-installing an
    /// existing rule name replaces the rule wholesale, so targets dropped by
    /// the new definition are unbound.
    pub async fn install(&self, rule: ChaosRule) -> Result<(), ChaosDnsError> {
        let selector = if rule.patterns.is_empty() {
            None
        } else {
            let compiled =
                Selector::compile(&rule.patterns).map_err(|source| ChaosDnsError::Pattern {
                    rule: rule.name.clone(),
                    source,
                })?;
            Some(Arc::new(compiled))
        };

        // Resolve every target before taking the write lock; the resolver
        // does network I/O and must not run under it.
        let mut resolved = Vec::with_capacity(rule.targets.len());
        for target in &rule.targets {
            let ip = self
                .resolver
                .resolve(&target.namespace, &target.name)
                .await
                .map_err(|source| ChaosDnsError::Resolve {
                    namespace: target.namespace.clone(),
                    name: target.name.clone(),
                    source,
                })?;
            resolved.push((target.clone(), ip));
        }

        let now = Instant::now();
        let mut inner = self.inner.write();

        if let Some(previous) = inner.rules.remove(&rule.name) {
            Self::evict_rule_bindings(&mut inner, &previous);
        }

        for (target, ip) in resolved {
            Self::evict_target(&mut inner, &target.namespace, &target.name);
            Self::evict_ip(&mut inner, ip);

            let binding = PodBinding {
                rule: rule.name.clone(),
                namespace: target.namespace.clone(),
                name: target.name.clone(),
                action: rule.action,
                selector: selector.clone(),
                observed_ip: ip,
                last_refresh: now,
            };
            inner.by_ip.insert(ip, target.clone());
            inner
                .by_target
                .entry(target.namespace)
                .or_default()
                .insert(target.name, binding);
        }

        debug!(rule = %rule.name, action = rule.action.as_str(), targets = rule.targets.len(), "installed chaos rule");
        inner.rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    /// Cancel a rule by name, unbinding every target it still owns. Unknown
    /// names succeed silently. Bindings superseded by a later rule are left
    /// alone.
    pub fn cancel(&self, name: &str) {
        let mut inner = self.inner.write();
        let Some(rule) = inner.rules.remove(name) else {
            debug!(rule = name, "cancel for unknown rule, ignoring");
            return;
        };
        Self::evict_rule_bindings(&mut inner, &rule);
        debug!(rule = name, "cancelled chaos rule");
    }

    /// Look up the binding for a source IP. Returns a snapshot copy so a
    /// concurrent writer deleting the entry cannot race the caller's use.
    pub fn lookup(&self, ip: IpAddr) -> Option<PodBinding> {
        let inner = self.inner.read();
        let owner = inner.by_ip.get(&ip)?;
        inner
            .by_target
            .get(&owner.namespace)?
            .get(&owner.name)
            .cloned()
    }

    /// Whether a binding is older than the freshness threshold.
    pub fn is_stale(&self, binding: &PodBinding) -> bool {
        binding.age() > self.refresh_threshold
    }

    /// Kick off a background refresh if the binding is stale. The caller
    /// keeps using its snapshot; the refresh never blocks a request.
    pub fn maybe_refresh(&self, binding: &PodBinding) {
        if !self.is_stale(binding) {
            return;
        }
        let registry = self.clone();
        let namespace = binding.namespace.clone();
        let name = binding.name.clone();
        tokio::spawn(async move {
            registry.refresh(&namespace, &name).await;
        });
    }

    /// Re-resolve a pod and re-index its binding under the new IP. Resolver
    /// failures are logged and the stale binding keeps serving.
    pub async fn refresh(&self, namespace: &str, name: &str) {
        let ip = match self.resolver.resolve(namespace, name).await {
            Ok(ip) => ip,
            Err(error) => {
                warn!(namespace, name, %error, "pod refresh failed, keeping stale binding");
                metrics::record_refresh(RefreshOutcome::Failed);
                return;
            }
        };

        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let old_ip = {
            // The binding may have been cancelled while the resolver call was
            // in flight; that is not an error.
            let Some(binding) = inner
                .by_target
                .get_mut(namespace)
                .and_then(|pods| pods.get_mut(name))
            else {
                return;
            };
            binding.last_refresh = Instant::now();
            let old_ip = binding.observed_ip;
            if old_ip == ip {
                metrics::record_refresh(RefreshOutcome::Unchanged);
                return;
            }
            binding.observed_ip = ip;
            old_ip
        };

        inner.by_ip.remove(&old_ip);
        Self::evict_ip(inner, ip);
        inner.by_ip.insert(ip, PodRef::new(namespace, name));

        debug!(namespace, name, old_ip = %old_ip, new_ip = %ip, "reindexed pod binding");
        metrics::record_refresh(RefreshOutcome::Updated);
    }

    /// Number of live rules.
    pub fn rule_count(&self) -> usize {
        self.inner.read().rules.len()
    }

    /// Number of live pod bindings.
    pub fn binding_count(&self) -> usize {
        self.inner.read().by_target.values().map(HashMap::len).sum()
    }

    /// Emit current registry gauges.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let bindings = inner.by_target.values().map(HashMap::len).sum();
        metrics::record_registry_counts(inner.rules.len(), bindings);
    }

    /// Remove the binding for (namespace, name) from both indices, purging
    /// the namespace sub-map if it becomes empty.
    fn evict_target(inner: &mut RegistryInner, namespace: &str, name: &str) {
        let Some(bindings) = inner.by_target.get_mut(namespace) else {
            return;
        };
        let Some(binding) = bindings.remove(name) else {
            return;
        };
        if bindings.is_empty() {
            inner.by_target.remove(namespace);
        }
        inner.by_ip.remove(&binding.observed_ip);
    }

    /// Remove whatever binding currently claims `ip`. A pod can inherit an
    /// address released by another; the displaced owner must leave both
    /// indices.
    fn evict_ip(inner: &mut RegistryInner, ip: IpAddr) {
        if let Some(owner) = inner.by_ip.remove(&ip) {
            if let Some(bindings) = inner.by_target.get_mut(&owner.namespace) {
                bindings.remove(&owner.name);
                if bindings.is_empty() {
                    inner.by_target.remove(&owner.namespace);
                }
            }
        }
    }

    /// Unbind every target of `rule` that is still owned by it.
    fn evict_rule_bindings(inner: &mut RegistryInner, rule: &ChaosRule) {
        for target in &rule.targets {
            let owned = inner
                .by_target
                .get(&target.namespace)
                .and_then(|pods| pods.get(&target.name))
                .is_some_and(|binding| binding.rule == rule.name);
            if owned {
                Self::evict_target(inner, &target.namespace, &target.name);
            }
        }
    }
}
