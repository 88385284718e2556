//! Service wiring and lifecycle management.

use hickory_server::authority::Catalog;
use hickory_server::server::RequestHandler;
use hickory_server::ServerFuture;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::control::ControlServer;
use crate::error::ChaosDnsError;
use crate::handler::ChaosHandler;
use crate::registry::ChaosRegistry;
use crate::resolver::PodResolver;

/// TCP connection timeout for the DNS listener.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval for emitting registry metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit registry metrics.
async fn metrics_loop(registry: ChaosRegistry, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.emit_metrics();
                debug!(
                    rules = registry.rule_count(),
                    bindings = registry.binding_count(),
                    "emitted registry metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// The chaos DNS service: interception handler, DNS listeners, and the
/// control-plane server, sharing one registry.
pub struct ChaosDnsServer<N> {
    config: Config,
    registry: ChaosRegistry,
    next: Option<N>,
}

impl ChaosDnsServer<Catalog> {
    /// Server with no downstream handler; queries chaos does not claim are
    /// answered SERVFAIL. Deployments that serve real traffic wire a next
    /// handler via [`ChaosDnsServer::with_next`].
    pub fn new(config: Config, resolver: Arc<dyn PodResolver>) -> Self {
        Self {
            registry: ChaosRegistry::new(resolver),
            config,
            next: None,
        }
    }
}

impl<N: RequestHandler> ChaosDnsServer<N> {
    /// Server that falls through to `next` for non-chaos traffic.
    pub fn with_next(config: Config, resolver: Arc<dyn PodResolver>, next: N) -> Self {
        Self {
            registry: ChaosRegistry::new(resolver),
            config,
            next: Some(next),
        }
    }

    /// The shared rule registry.
    pub fn registry(&self) -> &ChaosRegistry {
        &self.registry
    }

    /// Run the DNS and control servers until shutdown is requested.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ChaosDnsError> {
        info!(
            listen_addr = %self.config.dns.listen_addr,
            control_port = self.config.control.port,
            "Starting chaos-dns server"
        );

        // Control plane first so rules can land before queries arrive.
        let control_addr =
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.control.port));
        let control = ControlServer::bind(control_addr, self.registry.clone()).await?;
        let control_shutdown = shutdown.clone();
        let control_handle = tokio::spawn(async move {
            if let Err(e) = control.run(control_shutdown).await {
                error!("control server error: {}", e);
            }
        });

        let handler = match self.next {
            Some(next) => ChaosHandler::with_next(self.registry.clone(), next),
            None => ChaosHandler::new(self.registry.clone()),
        };
        let mut server = ServerFuture::new(handler);

        let udp_socket = UdpSocket::bind(self.config.dns.listen_addr).await?;
        info!(addr = %self.config.dns.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.dns.listen_addr).await?;
        info!(addr = %self.config.dns.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!("chaos-dns ready to serve queries");

        let metrics_registry = self.registry.clone();
        let metrics_shutdown = shutdown.clone();
        let metrics_handle = tokio::spawn(metrics_loop(metrics_registry, metrics_shutdown));
        self.registry.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("chaos-dns shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        let _ = metrics_handle.await;
        let _ = control_handle.await;

        info!("chaos-dns stopped");
        Ok(())
    }
}
