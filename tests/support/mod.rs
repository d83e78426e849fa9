#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use kubext::{
    ClusterClient, ClusterError, ExternalEndpoint, IngressRecord, ServicePortRecord,
    ServiceRecord,
};
use opencost_proxy::backend::BackendSource;
use opencost_proxy::forwarder::{Forwarder, ALLOCATION_PATH};
use opencost_proxy::server::{router, AppState};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// In-memory cluster answering lookups from fixed records.
#[derive(Default)]
pub struct MockClusterClient {
    pub services: Vec<ServiceRecord>,
    pub ingresses: Vec<IngressRecord>,
    pub list_calls: AtomicUsize,
}

fn not_found(kind: &str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{} \"{}\" not found in {}", kind, name, namespace),
        reason: "NotFound".to_owned(),
        code: 404,
    }))
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.services.clone())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceRecord, ClusterError> {
        self.services
            .iter()
            .find(|svc| svc.namespace == namespace && svc.name == name)
            .cloned()
            .ok_or_else(|| not_found("services", namespace, name))
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<IngressRecord, ClusterError> {
        self.ingresses
            .iter()
            .find(|ingress| ingress.namespace == namespace && ingress.name == name)
            .cloned()
            .ok_or_else(|| not_found("ingresses", namespace, name))
    }
}

pub fn service(namespace: &str, name: &str, ip: Option<&str>, ports: &[i32]) -> ServiceRecord {
    ServiceRecord {
        name: name.to_owned(),
        namespace: namespace.to_owned(),
        ports: ports
            .iter()
            .map(|port| ServicePortRecord {
                port: *port,
                protocol: "TCP".to_owned(),
            })
            .collect(),
        external_endpoints: ip
            .map(|ip| {
                vec![ExternalEndpoint {
                    ip: Some(ip.to_owned()),
                    hostname: None,
                }]
            })
            .unwrap_or_default(),
    }
}

async fn echo(Query(params): Query<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(params)
}

/// Backend stub that answers the allocation path with the query parameters it received.
pub fn echo_backend() -> Router {
    Router::new().route(ALLOCATION_PATH, get(echo))
}

/// Backend stub that answers the allocation path with a fixed status, content type and body.
pub fn fixed_backend(status: StatusCode, content_type: &'static str, body: &'static str) -> Router {
    Router::new().route(
        ALLOCATION_PATH,
        get(move || async move {
            let response: Response =
                (status, [(axum::http::header::CONTENT_TYPE, content_type)], body).into_response();
            response
        }),
    )
}

/// Backend stub that answers the allocation path with a status and body but no content type.
pub fn untyped_backend(status: StatusCode, body: &'static str) -> Router {
    Router::new().route(
        ALLOCATION_PATH,
        get(move || async move {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response
        }),
    )
}

pub async fn spawn_router(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });
    addr
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    listener.local_addr().expect("Failed to read local address")
}

/// Listener that accepts connections and closes them straight away, counting each accept.
pub async fn spawn_closing_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to read local address");
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (addr, accepts)
}

/// Spawns the proxy and returns its base URL.
pub async fn spawn_proxy(backends: BackendSource) -> String {
    let forwarder = Forwarder::try_default().expect("Failed to build forwarder");
    let addr = spawn_router(router(AppState::new(backends, forwarder))).await;
    format!("http://{}", addr)
}
