//! Dynamic per-process gRPC-Web proxy
//!
//! Each cache entry owns a persistent HTTP/2 client towards one backend
//! port and a catch-all forwarding service wrapped with the gRPC-Web
//! adapter. Entries are created on first use; when a process restarts on a
//! different port a new entry is created and the stale one is left behind
//! (growth bounded by cumulative restart count).

use crate::adapters::grpcweb::{box_tonic_body, plain_response, GatewayBody, WebService};
use crate::domain::services::ProcessManager;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};
use tracing::{info, warn};

/// Catch-all forwarder against one fixed backend: the behavior of the load
/// balancer's proxy body, minus routing. Type information is ignored; the
/// method name string travels in the path.
#[derive(Clone)]
pub struct GrpcForwarder {
    authority: String,
    client: Client<HttpConnector, Body>,
}

impl GrpcForwarder {
    pub fn new(authority: String) -> Self {
        Self {
            authority,
            client: Client::builder().http2_only(true).build_http(),
        }
    }
}

impl NamedService for GrpcForwarder {
    const NAME: &'static str = "winproc.grpcweb.forwarder";
}

impl Service<Request<Body>> for GrpcForwarder {
    type Response = Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let client = self.client.clone();
        let authority = self.authority.clone();
        Box::pin(async move {
            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            let uri: Uri = match format!("http://{authority}{path_and_query}").parse() {
                Ok(uri) => uri,
                Err(e) => {
                    return Ok(grpc_error_response(
                        tonic::Code::Internal,
                        &format!("invalid backend uri: {e}"),
                    ))
                }
            };
            *req.uri_mut() = uri;
            req.headers_mut().remove(http::header::HOST);

            match client.request(req).await {
                Ok(response) => Ok(response.map(|body| {
                    use http_body::Body as _;
                    body.map_err(|e| tonic::Status::internal(e.to_string()))
                        .boxed_unsync()
                })),
                Err(e) => {
                    warn!(authority = %authority, error = %e, "grpc-web backend dial failed");
                    Ok(grpc_error_response(
                        tonic::Code::Unavailable,
                        &format!("failed to connect to backend {authority}: {e}"),
                    ))
                }
            }
        })
    }
}

/// Trailers-only gRPC response with the status in the headers frame
fn grpc_error_response(code: tonic::Code, message: &str) -> Response<BoxBody> {
    use http::header::HeaderValue;

    let mut response = Response::new(tonic::body::empty_body());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    if let Ok(value) = HeaderValue::from_str(&(code as i32).to_string()) {
        headers.insert("grpc-status", value);
    }
    if let Ok(value) = HeaderValue::from_str(&message.replace(['\r', '\n'], " ")) {
        headers.insert("grpc-message", value);
    }
    response
}

/// Cache of gRPC-Web-wrapped forwarders keyed by `(name, port)`.
/// BoxCloneService is Send but not Sync, so the map lives under a Mutex and
/// callers clone their entry out.
pub struct GrpcWebProxy {
    manager: Arc<ProcessManager>,
    entries: Mutex<HashMap<String, WebService>>,
}

impl GrpcWebProxy {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self {
            manager,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, name: &str, port: u16) -> WebService {
        let key = format!("{name}:{port}");
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(&key) {
            return entry.clone();
        }
        let wrapper = BoxCloneService::new(tonic_web::enable(GrpcForwarder::new(format!(
            "127.0.0.1:{port}"
        ))));
        entries.insert(key, wrapper.clone());
        info!(process = %name, port = port, "created gRPC-Web proxy entry");
        wrapper
    }

    /// Forward one gRPC-Web request to the named process. The
    /// `/proxy/<name>` prefix is stripped before the request reaches the
    /// gRPC-Web adapter.
    pub async fn handle(&self, name: &str, mut req: Request<Body>) -> Response<GatewayBody> {
        let port = match self.manager.status(name) {
            Ok(instances) => instances
                .first()
                .map(|inst| inst.port)
                .filter(|port| *port > 0),
            Err(_) => None,
        };
        let Some(port) = port else {
            return plain_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("process {name} is not running or has no port assigned"),
            );
        };

        // Rewrite the path: /proxy/<name>/pkg.Svc/Method -> /pkg.Svc/Method
        let prefix = format!("/proxy/{name}");
        let original = req.uri().clone();
        let stripped = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .and_then(|pq| pq.strip_prefix(prefix.as_str()))
            .unwrap_or("/");
        match stripped.parse::<Uri>() {
            Ok(uri) => *req.uri_mut() = uri,
            Err(_) => {
                return plain_response(StatusCode::BAD_REQUEST, "invalid proxy path");
            }
        }

        let entry = self.entry(name, port);
        match entry.oneshot(req).await {
            Ok(response) => response.map(box_tonic_body),
            Err(_) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, "proxy error"),
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ProcessSpec;
    use crate::domain::ports::mocks::MockExecutor;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn manager_with_running(dirs: &TempDir) -> Arc<ProcessManager> {
        let data_dir = dirs.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("svc.env"), "K=v\n").unwrap();
        let bin = dirs.path().join("svc_v1.0.0.exe");
        std::fs::write(&bin, b"exe").unwrap();
        Arc::new(ProcessManager::new(
            vec![ProcessSpec {
                name: "svc".to_string(),
                binary_path: Some(bin),
                max_instances: 2,
                ..Default::default()
            }],
            Arc::new(MockExecutor::new()),
            data_dir,
            dirs.path().join("binaries"),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_handle_without_running_instance_is_503() {
        let dirs = TempDir::new().unwrap();
        let proxy = GrpcWebProxy::new(manager_with_running(&dirs));
        let req = Request::builder()
            .uri("/proxy/svc/pkg.A/Foo")
            .header("content-type", "application/grpc-web+proto")
            .body(Body::empty())
            .unwrap();
        let response = proxy.handle("svc", req).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_entries_cached_per_name_and_port() {
        let dirs = TempDir::new().unwrap();
        let manager = manager_with_running(&dirs);
        let snapshot = manager.start("svc").await.unwrap();
        let proxy = GrpcWebProxy::new(manager.clone());

        let _ = proxy.entry("svc", snapshot.port);
        let _ = proxy.entry("svc", snapshot.port);
        assert_eq!(proxy.entry_count(), 1);

        // A restart on a new port creates a second entry; the stale one is
        // intentionally left for later eviction
        let _ = proxy.entry("svc", snapshot.port + 1);
        assert_eq!(proxy.entry_count(), 2);
    }
}
