use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::forwarder::{ForwarderConfig, RetryPolicy};
use crate::locator::DiscoveryPolicy;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_KUBECONFIG: &str = "./kubeConfig/kubeconfig.yaml";
pub const DEFAULT_CONFIG: &str = "./proxy.yaml";

/// When the backend address is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStrategy {
    /// Discover on every request.
    #[default]
    PerRequest,
    /// Discover once before serving and keep the result for the process lifetime.
    Startup,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfigFile {
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default, alias = "wait-ms")]
    pub wait_ms: Option<u64>,
    #[serde(default, alias = "max-wait-ms")]
    pub max_wait_ms: Option<u64>,
}

/// Proxy configuration file (YAML).
///
/// Example `proxy.yaml`:
/// ```yaml
/// listen: 0.0.0.0:8080
/// resolve: startup
/// timeout-secs: 10
/// retry:
///   count: 3
///   wait-ms: 5000
///   max-wait-ms: 20000
/// discovery:
///   policy: by-name
///   namespace: opencost
///   name: opencost
///   port: 9090
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfigFile {
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default)]
    pub resolve: Option<ResolveStrategy>,
    #[serde(default, alias = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryConfigFile>,
    #[serde(default)]
    pub discovery: Option<DiscoveryPolicy>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Effective settings after merging CLI > config file > defaults.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub resolve: ResolveStrategy,
    pub discovery: DiscoveryPolicy,
    pub forwarder: ForwarderConfig,
}

impl ProxyConfig {
    pub fn merge(
        file: ProxyConfigFile,
        listen: Option<SocketAddr>,
        backend: Option<DiscoveryPolicy>,
    ) -> anyhow::Result<Self> {
        let listen = match listen.or(file.listen) {
            Some(listen) => listen,
            None => DEFAULT_LISTEN.parse()?,
        };

        let defaults = ForwarderConfig::default();
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetryPolicy {
            count: retry_file.count.unwrap_or(defaults.retry.count),
            wait: retry_file
                .wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.wait),
            max_wait: retry_file
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_wait),
        };

        Ok(Self {
            listen,
            resolve: file.resolve.unwrap_or_default(),
            discovery: backend.or(file.discovery).unwrap_or_default(),
            forwarder: ForwarderConfig {
                timeout: file
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
                retry,
            },
        })
    }
}

/// Parses `host:port` (or `[v6]:port`) into a static discovery policy.
pub fn parse_backend(value: &str) -> Result<DiscoveryPolicy, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {:?}", value))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in {:?}", value));
    }
    let port = port
        .parse::<u16>()
        .map_err(|err| format!("invalid port in {:?}: {}", value, err))?;

    Ok(DiscoveryPolicy::Static {
        address: host.to_owned(),
        port,
    })
}
