//! Finds the allocation backend among the cluster's services.
//!
//! Every policy is deterministic: the same ordered input always yields the same
//! endpoint, and the first qualifying match wins.

use crate::backend::{BackendEndpoint, InvalidEndpoint};
use kubext::{ClusterClient, ClusterError, ServiceRecord};
use serde::Deserialize;
use tracing::debug;

pub const DISCOVERY_PORT: u16 = 9090;
pub const DEFAULT_NAMESPACE: &str = "opencost";
pub const DEFAULT_NAME: &str = "opencost";
pub const DEFAULT_INGRESS_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// First service with an external endpoint that exposes `port`.
    ByPort {
        #[serde(default = "default_discovery_port")]
        port: u16,
    },
    /// A single named service. Without `port` the service's first declared port is used.
    ByName {
        #[serde(default = "default_namespace")]
        namespace: String,
        #[serde(default = "default_name")]
        name: String,
        #[serde(default)]
        port: Option<u16>,
    },
    /// The host of the first rule of a single named ingress.
    ByIngress {
        #[serde(default = "default_namespace")]
        namespace: String,
        #[serde(default = "default_name")]
        name: String,
        #[serde(default = "default_ingress_port")]
        port: u16,
    },
    /// A fixed address; the cluster is never consulted.
    Static { address: String, port: u16 },
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        DiscoveryPolicy::ByPort {
            port: DISCOVERY_PORT,
        }
    }
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_name() -> String {
    DEFAULT_NAME.to_owned()
}

fn default_ingress_port() -> u16 {
    DEFAULT_INGRESS_PORT
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("OpenCost service with port {port} not found")]
    NotFound { port: u16 },
    #[error("{kind} {namespace}/{name} has no {field}")]
    MissingField {
        kind: &'static str,
        namespace: String,
        name: String,
        field: &'static str,
    },
    #[error("failed to {stage}: {source}")]
    Cluster {
        stage: String,
        #[source]
        source: ClusterError,
    },
    #[error("invalid backend endpoint: {0}")]
    InvalidEndpoint(#[from] InvalidEndpoint),
}

/// Scans services in the given order, then each service's external endpoints,
/// then its ports, and returns the first endpoint paired with `port`.
pub fn resolve_by_port(
    services: &[ServiceRecord],
    port: u16,
) -> Result<BackendEndpoint, DiscoveryError> {
    for service in services {
        for endpoint in &service.external_endpoints {
            let Some(address) = endpoint.address() else {
                continue;
            };

            if let Some(matched) = service.ports.iter().find(|p| p.port == i32::from(port)) {
                debug!(
                    "Matched service {}/{} on {}:{}",
                    service.namespace, service.name, address, matched.port
                );
                return Ok(BackendEndpoint::new(address, i64::from(matched.port))?);
            }
        }
    }

    Err(DiscoveryError::NotFound { port })
}

pub async fn resolve(
    cluster: &dyn ClusterClient,
    policy: &DiscoveryPolicy,
) -> Result<BackendEndpoint, DiscoveryError> {
    match policy {
        DiscoveryPolicy::ByPort { port } => {
            let services = cluster
                .list_services()
                .await
                .map_err(|source| DiscoveryError::Cluster {
                    stage: "list services".to_owned(),
                    source,
                })?;
            resolve_by_port(&services, *port)
        }
        DiscoveryPolicy::ByName {
            namespace,
            name,
            port,
        } => resolve_by_name(cluster, namespace, name, *port).await,
        DiscoveryPolicy::ByIngress {
            namespace,
            name,
            port,
        } => resolve_by_ingress(cluster, namespace, name, *port).await,
        DiscoveryPolicy::Static { address, port } => {
            Ok(BackendEndpoint::new(address.as_str(), i64::from(*port))?)
        }
    }
}

async fn resolve_by_name(
    cluster: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    port: Option<u16>,
) -> Result<BackendEndpoint, DiscoveryError> {
    let service = cluster
        .get_service(namespace, name)
        .await
        .map_err(|source| DiscoveryError::Cluster {
            stage: format!("get service {}/{}", namespace, name),
            source,
        })?;

    let missing = |field| DiscoveryError::MissingField {
        kind: "service",
        namespace: namespace.to_owned(),
        name: name.to_owned(),
        field,
    };

    let address = service
        .external_endpoints
        .iter()
        .find_map(|endpoint| endpoint.address())
        .ok_or_else(|| missing("external IP or hostname"))?;

    let port = match port {
        Some(port) => i64::from(port),
        None => service
            .ports
            .first()
            .map(|p| i64::from(p.port))
            .ok_or_else(|| missing("ports"))?,
    };

    Ok(BackendEndpoint::new(address, port)?)
}

async fn resolve_by_ingress(
    cluster: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    port: u16,
) -> Result<BackendEndpoint, DiscoveryError> {
    let ingress = cluster
        .get_ingress(namespace, name)
        .await
        .map_err(|source| DiscoveryError::Cluster {
            stage: format!("get ingress {}/{}", namespace, name),
            source,
        })?;

    let missing = |field| DiscoveryError::MissingField {
        kind: "ingress",
        namespace: namespace.to_owned(),
        name: name.to_owned(),
        field,
    };

    let host = match ingress.rules.first() {
        None => return Err(missing("rules")),
        Some(host) => host
            .as_deref()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| missing("host on its first rule"))?,
    };

    Ok(BackendEndpoint::new(host, i64::from(port))?)
}
