//! Pod IP resolution against the cluster.
//!
//! The registry only ever needs one question answered: "what is the current
//! IP of pod (namespace, name)?". That question is behind the [`PodResolver`]
//! trait so the registry and its tests never touch a real cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;
use tracing::info;

use crate::config::KubernetesConfig;
use crate::error::ChaosDnsError;

/// Why a pod could not be resolved to an IP.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The cluster API call failed.
    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),

    /// The pod is not known to the resolver.
    #[error("pod not found")]
    NotFound,

    /// The pod exists but has no IP assigned yet.
    #[error("pod has no assigned IP")]
    NoIp,

    /// The reported pod IP did not parse as an address.
    #[error("invalid pod IP {0:?}")]
    InvalidIp(String),
}

/// Resolves a (namespace, name) pod reference to its current IP.
#[async_trait]
pub trait PodResolver: Send + Sync {
    /// Fetch the pod's current IP. Blocking network I/O; may fail.
    async fn resolve(&self, namespace: &str, name: &str) -> Result<IpAddr, ResolveError>;
}

/// Production resolver backed by the Kubernetes API.
pub struct KubePodResolver {
    client: Client,
}

impl KubePodResolver {
    /// Build a resolver from the configured credentials: an explicit
    /// kubeconfig when one is given, otherwise the in-cluster service
    /// account.
    pub async fn from_config(config: &KubernetesConfig) -> Result<Self, ChaosDnsError> {
        let client_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ChaosDnsError::Config(e.to_string()))?;
                let options = KubeConfigOptions {
                    context: config.context.clone(),
                    ..Default::default()
                };
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ChaosDnsError::Config(e.to_string()))?
            }
            None => {
                kube::Config::incluster().map_err(|e| ChaosDnsError::Config(e.to_string()))?
            }
        };

        let client = Client::try_from(client_config)?;
        info!("kubernetes client initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl PodResolver for KubePodResolver {
    async fn resolve(&self, namespace: &str, name: &str) -> Result<IpAddr, ResolveError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(name).await?;

        let ip = pod
            .status
            .and_then(|status| status.pod_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or(ResolveError::NoIp)?;

        ip.parse().map_err(|_| ResolveError::InvalidIp(ip))
    }
}

/// Fixed-table resolver for tests and local development.
#[derive(Default)]
pub struct StaticPodResolver {
    pods: Mutex<HashMap<(String, String), IpAddr>>,
}

impl StaticPodResolver {
    /// Empty resolver; every lookup fails until pods are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the IP a pod resolves to.
    pub fn set(&self, namespace: &str, name: &str, ip: IpAddr) {
        self.pods
            .lock()
            .insert((namespace.to_string(), name.to_string()), ip);
    }

    /// Remove a pod; subsequent lookups fail with `NotFound`.
    pub fn remove(&self, namespace: &str, name: &str) {
        self.pods
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl PodResolver for StaticPodResolver {
    async fn resolve(&self, namespace: &str, name: &str) -> Result<IpAddr, ResolveError> {
        self.pods
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
            .ok_or(ResolveError::NotFound)
    }
}
