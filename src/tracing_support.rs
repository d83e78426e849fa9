//! Support for tracing execution of the proxy.

use tracing_subscriber::{fmt::Subscriber, prelude::*, EnvFilter};

/// Set up the `tracing` library, logging at `info` unless `RUST_LOG` says otherwise.
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish()
        .init();
}
