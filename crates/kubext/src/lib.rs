use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::Client;
use std::path::Path;
use tracing::debug;

pub mod kubeconfig;
pub mod records;

pub use kubeconfig::ConfigError;
pub use records::{ExternalEndpoint, IngressRecord, ServicePortRecord, ServiceRecord};

/// Errors reported by the cluster while serving a lookup.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),
}

/// Read-only view of the cluster's service registry.
///
/// Lookups are passed through as-is; retry policy belongs to the
/// implementation's underlying client, not to callers.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Lists services across all namespaces, in the order the API server returns them.
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<ServiceRecord, ClusterError>;

    async fn get_ingress(&self, namespace: &str, name: &str)
        -> Result<IngressRecord, ClusterError>;
}

/// [`ClusterClient`] backed by a `kube` client.
#[derive(Clone)]
pub struct KubeClusterClient {
    kubernetes_client: Client,
}

impl KubeClusterClient {
    pub fn new(kubernetes_client: Client) -> Self {
        Self { kubernetes_client }
    }

    /// Reads the kubeconfig at `path` once and connects with its current context.
    pub async fn try_from_kubeconfig(path: &Path) -> Result<Self, ConfigError> {
        let content = kubeconfig::read_kubeconfig(path)?;
        let kubernetes_client = kubeconfig::client_from_kubeconfig(&content).await?;
        Ok(Self::new(kubernetes_client))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError> {
        let service_api: Api<Service> = Api::all(self.kubernetes_client.clone());
        let services = service_api.list(&ListParams::default()).await?;
        debug!("Listed {} services", services.items.len());

        Ok(services.items.iter().map(ServiceRecord::from).collect())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceRecord, ClusterError> {
        let service_api: Api<Service> = Api::namespaced(self.kubernetes_client.clone(), namespace);
        let service = service_api.get(name).await?;
        Ok(ServiceRecord::from(&service))
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<IngressRecord, ClusterError> {
        let ingress_api: Api<Ingress> = Api::namespaced(self.kubernetes_client.clone(), namespace);
        let ingress = ingress_api.get(name).await?;
        Ok(IngressRecord::from(&ingress))
    }
}
