use anyhow::Context;
use clap::Parser;
use kubext::{ClusterClient, KubeClusterClient};
use opencost_proxy::backend::{BackendEndpoint, BackendSource};
use opencost_proxy::config::{
    load_config_file, parse_backend, ProxyConfig, ProxyConfigFile, ResolveStrategy,
    DEFAULT_CONFIG, DEFAULT_KUBECONFIG,
};
use opencost_proxy::forwarder::Forwarder;
use opencost_proxy::locator::{self, DiscoveryPolicy};
use opencost_proxy::server::{start_server, AppState};
use opencost_proxy::tracing_support::initialize_tracing;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "proxy",
    about = "Forwards OpenCost allocation queries to the backend discovered in a cluster"
)]
struct Cli {
    /// Path to the kubeconfig file
    #[arg(long, default_value = DEFAULT_KUBECONFIG)]
    kubeconfig: PathBuf,

    /// Path to YAML config file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Fixed backend as host:port, skips cluster discovery
    #[arg(long, value_parser = parse_backend)]
    backend: Option<DiscoveryPolicy>,
}

async fn backend_source(cli: &Cli, config: &ProxyConfig) -> anyhow::Result<BackendSource> {
    if let DiscoveryPolicy::Static { address, port } = &config.discovery {
        let backend = BackendEndpoint::new(address.as_str(), i64::from(*port))?;
        info!("Using static backend {}", backend);
        return Ok(BackendSource::Pinned(backend));
    }

    let kubeconfig = std::path::absolute(&cli.kubeconfig)
        .context("Failed to get absolute path for kubeconfig")?;
    info!("Kubeconfig: {}", kubeconfig.display());
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(KubeClusterClient::try_from_kubeconfig(&kubeconfig).await?);

    match config.resolve {
        ResolveStrategy::Startup => {
            let backend = locator::resolve(cluster.as_ref(), &config.discovery)
                .await
                .context("Error fetching services")?;
            info!("OpenCost service: {}", backend);
            Ok(BackendSource::Pinned(backend))
        }
        ResolveStrategy::PerRequest => Ok(BackendSource::Discover {
            cluster,
            policy: config.discovery.clone(),
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_tracing();
    let cli = Cli::parse();

    // Config file is optional; a missing file yields defaults.
    let file_cfg: ProxyConfigFile = load_config_file(&cli.config)
        .with_context(|| format!("Failed to load config file {}", cli.config.display()))?;
    let config = ProxyConfig::merge(file_cfg, cli.listen, cli.backend.clone())?;

    info!("Starting OpenCost proxy");
    info!("  Listen:    {}", config.listen);
    info!("  Discovery: {:?}", config.discovery);
    info!("  Resolve:   {:?}", config.resolve);

    let backends = backend_source(&cli, &config).await?;
    let forwarder = Forwarder::try_new(config.forwarder.clone())?;

    start_server(config.listen, AppState::new(backends, forwarder)).await
}
