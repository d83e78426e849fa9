pub mod backend;
pub mod config;
pub mod cors;
pub mod forwarder;
pub mod locator;
pub mod request_id;
pub mod server;
pub mod tracing_support;
