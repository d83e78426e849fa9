use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::{Path, PathBuf};

/// Errors raised while turning a kubeconfig file into a client. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read kubeconfig file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build config from kubeconfig content: {0}")]
    Parse(#[source] kube::config::KubeconfigError),
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[source] kube::Error),
}

pub fn read_kubeconfig(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })
}

/// Builds a client from kubeconfig YAML, using the file's current context.
pub async fn client_from_kubeconfig(content: &str) -> Result<Client, ConfigError> {
    let kubeconfig = Kubeconfig::from_yaml(content).map_err(ConfigError::Parse)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(ConfigError::Parse)?;

    Client::try_from(config).map_err(ConfigError::Client)
}
