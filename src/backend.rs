use crate::locator::{self, DiscoveryError, DiscoveryPolicy};
use kubext::ClusterClient;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidEndpoint {
    #[error("backend address is empty")]
    EmptyAddress,
    #[error("backend port {0} is outside 1..=65535")]
    PortOutOfRange(i64),
}

/// Where the allocation backend can be reached. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    address: String,
    port: u16,
}

impl BackendEndpoint {
    pub fn new(address: impl Into<String>, port: i64) -> Result<Self, InvalidEndpoint> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(InvalidEndpoint::EmptyAddress);
        }

        match u16::try_from(port) {
            Ok(port) if port > 0 => Ok(Self { address, port }),
            _ => Err(InvalidEndpoint::PortOutOfRange(port)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// How the proxy obtains its backend for each request.
///
/// `Pinned` is resolved once before the server starts and never refreshed: a
/// moved backend keeps being used until restart. `Discover` queries the cluster
/// on every request, paying the lookup cost but always following the current
/// service state.
pub enum BackendSource {
    Pinned(BackendEndpoint),
    Discover {
        cluster: Arc<dyn ClusterClient>,
        policy: DiscoveryPolicy,
    },
}

impl BackendSource {
    pub async fn backend(&self) -> Result<BackendEndpoint, DiscoveryError> {
        match self {
            BackendSource::Pinned(backend) => Ok(backend.clone()),
            BackendSource::Discover { cluster, policy } => {
                locator::resolve(cluster.as_ref(), policy).await
            }
        }
    }
}
