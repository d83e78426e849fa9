use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backend::BackendSource;
use crate::cors::cors_middleware;
use crate::forwarder::{AllocationQuery, ForwardError, Forwarder, ALLOCATION_PATH};
use crate::locator::DiscoveryError;
use crate::request_id::request_id_middleware;

/// Shared state injected into the handlers. Read-only once the server is up.
#[derive(Clone)]
pub struct AppState {
    pub backends: Arc<BackendSource>,
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    pub fn new(backends: BackendSource, forwarder: Forwarder) -> Self {
        Self {
            backends: Arc::new(backends),
            forwarder: Arc::new(forwarder),
        }
    }
}

/// Everything a request can fail with once the server is running.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Discovery(err) => error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Forward(ForwardError::Backend {
                status,
                body,
                content_type,
            }) => {
                let mut response = (status, body).into_response();
                match content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                    Some(value) => {
                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                    }
                    None => {
                        response.headers_mut().remove(header::CONTENT_TYPE);
                    }
                }
                response
            }
            ApiError::Forward(err) => error_body(err.status(), err.to_string()),
        }
    }
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

async fn allocation_compute(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let params = AllocationQuery::from_pairs(pairs);

    let backend = state.backends.backend().await.map_err(|err| {
        warn!("Failed to discover allocation backend: {}", err);
        err
    })?;

    match state.forwarder.forward(&backend, &params).await {
        Ok(allocation) => Ok((allocation.status, Json(Value::Object(allocation.body))).into_response()),
        Err(err) => {
            warn!("Forwarding to {} failed: {}", backend, err);
            Err(err.into())
        }
    }
}

async fn not_found() -> Response {
    error_body(StatusCode::NOT_FOUND, "not found".to_owned())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route(ALLOCATION_PATH, get(allocation_compute))
        .fallback(not_found)
        .layer(middleware::from_fn(cors_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn start_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Starting proxy on {}", listener.local_addr()?);
    serve(listener, state, shutdown_signal()).await?;
    info!("Proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
