//! Control-plane protocol: rule mutation over a framed TCP connection.
//!
//! One length-delimited frame carries one bincode-encoded message; every
//! request frame is answered by exactly one response frame on the same
//! connection, so requests from a single client are applied in order.
//! Connections are served concurrently; the registry's lock provides
//! serializability across them.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChaosDnsError;
use crate::metrics;
use crate::registry::{ChaosRegistry, ChaosRule};

/// Default control-plane port.
pub const DEFAULT_CONTROL_PORT: u16 = 9288;

/// A control-plane request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Install (or redefine) a chaos rule.
    SetDnsChaos(ChaosRule),
    /// Remove a chaos rule by name; unknown names succeed.
    CancelDnsChaos {
        /// Name of the rule to remove.
        name: String,
    },
}

/// A control-plane response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    /// The request was applied.
    Ok,
    /// The request was rejected; the registry is unchanged.
    Error(String),
}

/// Control-plane server owning the listening socket.
pub struct ControlServer {
    registry: ChaosRegistry,
    listener: TcpListener,
}

impl ControlServer {
    /// Bind the control listener.
    pub async fn bind(addr: SocketAddr, registry: ChaosRegistry) -> Result<Self, ChaosDnsError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "control server listening");
        Ok(Self { registry, listener })
    }

    /// The bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ChaosDnsError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ChaosDnsError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("control server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(error) => {
                            warn!(%error, "control accept failed");
                            continue;
                        }
                    };
                    debug!(%peer, "control connection accepted");
                    let registry = self.registry.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(error) = serve_connection(stream, registry, shutdown).await {
                            warn!(%peer, %error, "control connection error");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    registry: ChaosRegistry,
    shutdown: CancellationToken,
) -> Result<(), ChaosDnsError> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = framed.next() => {
                let Some(frame) = frame else {
                    // Client hung up.
                    return Ok(());
                };
                let frame = frame?;
                let request: ControlRequest = bincode::deserialize(&frame)?;
                let response = dispatch(&registry, request).await;
                let encoded = bincode::serialize(&response)?;
                framed.send(Bytes::from(encoded)).await?;
            }
        }
    }
}

async fn dispatch(registry: &ChaosRegistry, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::SetDnsChaos(rule) => {
            info!(
                rule = %rule.name,
                action = rule.action.as_str(),
                patterns = rule.patterns.len(),
                targets = rule.targets.len(),
                "received SetDnsChaos"
            );
            match registry.install(rule).await {
                Ok(()) => {
                    metrics::record_control_request("set", true);
                    ControlResponse::Ok
                }
                Err(error) => {
                    warn!(%error, "rejecting SetDnsChaos");
                    metrics::record_control_request("set", false);
                    ControlResponse::Error(error.to_string())
                }
            }
        }
        ControlRequest::CancelDnsChaos { name } => {
            info!(rule = %name, "received CancelDnsChaos");
            registry.cancel(&name);
            metrics::record_control_request("cancel", true);
            ControlResponse::Ok
        }
    }
}

/// Client side of the control protocol.
pub struct ControlClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl ControlClient {
    /// Connect to a control server.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ChaosDnsError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
        })
    }

    /// Install a chaos rule. A rejection carries the server's error text.
    pub async fn set_dns_chaos(&mut self, rule: ChaosRule) -> Result<(), ChaosDnsError> {
        match self.call(&ControlRequest::SetDnsChaos(rule)).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Error(message) => Err(ChaosDnsError::Rejected(message)),
        }
    }

    /// Cancel a chaos rule by name. Idempotent.
    pub async fn cancel_dns_chaos(&mut self, name: &str) -> Result<(), ChaosDnsError> {
        let request = ControlRequest::CancelDnsChaos {
            name: name.to_string(),
        };
        match self.call(&request).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Error(message) => Err(ChaosDnsError::Rejected(message)),
        }
    }

    async fn call(&mut self, request: &ControlRequest) -> Result<ControlResponse, ChaosDnsError> {
        let encoded = bincode::serialize(request)?;
        self.framed.send(Bytes::from(encoded)).await?;

        let frame = self.framed.next().await.ok_or_else(|| {
            ChaosDnsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control connection closed",
            ))
        })??;
        Ok(bincode::deserialize(&frame)?)
    }
}
