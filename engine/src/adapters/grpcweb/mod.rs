//! Shared HTTP listener: REST + gRPC-Web + dynamic per-process proxy
//!
//! One listener serves three fronts, distinguished by request inspection:
//! gRPC-Web requests under `/proxy/<name>/` go to the dynamic per-process
//! proxy, other gRPC-Web requests hit the supervisor's own management
//! service, and everything else falls through to the REST router.

pub mod proxy;

pub use proxy::GrpcWebProxy;

use crate::adapters::grpc::ProcessManagerService;
use crate::domain::error::{DomainError, Result};
use crate::proto::winproc::process_manager_server::ProcessManagerServer;
use axum::Router;
use bytes::Bytes;
use http::header::{HeaderValue, ORIGIN};
use http::Method;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::ServiceExt;
use tracing::{error, info};

/// Unified body type for the shared listener
pub type GatewayBody =
    http_body::combinators::UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A gRPC-Web-enabled service with its adapter type erased
pub(crate) type WebService =
    BoxCloneService<Request<Body>, Response<tonic::body::BoxBody>, Infallible>;

pub fn box_hyper_body(body: Body) -> GatewayBody {
    use http_body::Body as _;
    body.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        .boxed_unsync()
}

pub(crate) fn box_tonic_body(body: tonic::body::BoxBody) -> GatewayBody {
    use http_body::Body as _;
    body.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        .boxed_unsync()
}

fn box_axum_body(body: axum::body::BoxBody) -> GatewayBody {
    use http_body::Body as _;
    body.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        .boxed_unsync()
}

pub fn plain_response(status: StatusCode, message: &str) -> Response<GatewayBody> {
    let mut response = Response::new(box_hyper_body(Body::from(message.to_string())));
    *response.status_mut() = status;
    response
}

/// A request is treated as gRPC-Web purely by content-type inspection
fn is_grpc_web(req: &Request<Body>) -> bool {
    req.headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/grpc-web"))
        .unwrap_or(false)
}

/// `/proxy/<name>/<grpc path>` -> target process name
fn proxy_target(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/proxy/")?;
    let slash = rest.find('/')?;
    let name = &rest[..slash];
    if name.is_empty() || rest[slash..].len() <= 1 {
        return None;
    }
    Some(name)
}

/// Permissive development CORS, mirrored onto every response
fn with_cors(mut response: Response<GatewayBody>, origin: Option<HeaderValue>) -> Response<GatewayBody> {
    if let Some(origin) = origin {
        let headers = response.headers_mut();
        headers.insert("access-control-allow-origin", origin);
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
        );
        headers.insert(
            "access-control-allow-headers",
            HeaderValue::from_static("content-type, x-grpc-web, x-user-agent"),
        );
        headers.insert(
            "access-control-expose-headers",
            HeaderValue::from_static("grpc-status, grpc-message"),
        );
    }
    response
}

/// The shared-listener dispatcher
pub struct HttpGateway {
    // axum's Router boxes its routes as a non-Sync trait object; handlers
    // clone out under the lock, matching the management_web pattern below.
    router: std::sync::Mutex<Router>,
    // BoxCloneService is Send but not Sync; handlers clone out under the lock
    management_web: std::sync::Mutex<WebService>,
    proxy: GrpcWebProxy,
}

impl HttpGateway {
    pub fn new(router: Router, management: ProcessManagerService, proxy: GrpcWebProxy) -> Self {
        Self {
            router: std::sync::Mutex::new(router),
            management_web: std::sync::Mutex::new(BoxCloneService::new(tonic_web::enable(
                ProcessManagerServer::new(management),
            ))),
            proxy,
        }
    }

    fn management_service(&self) -> WebService {
        self.management_web
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn rest_router(&self) -> Router {
        self.router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<GatewayBody> {
        let origin = req.headers().get(ORIGIN).cloned();

        if req.method() == Method::OPTIONS {
            let mut response = Response::new(box_hyper_body(Body::empty()));
            *response.status_mut() = StatusCode::OK;
            return with_cors(response, origin);
        }

        let response = if is_grpc_web(&req) {
            if let Some(name) = proxy_target(req.uri().path()).map(str::to_string) {
                // Dynamic gRPC-Web proxy towards a managed backend
                self.proxy.handle(&name, req).await
            } else {
                // The supervisor's own management service
                match self.management_service().oneshot(req).await {
                    Ok(response) => response.map(box_tonic_body),
                    Err(_) => plain_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "management service error",
                    ),
                }
            }
        } else {
            match self.rest_router().oneshot(req).await {
                Ok(response) => response.map(box_axum_body),
                Err(never) => match never {},
            }
        };

        with_cors(response, origin)
    }
}

/// Serve the shared HTTP listener until cancellation
pub async fn serve_shared(
    host: &str,
    port: u16,
    gateway: Arc<HttpGateway>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| DomainError::InvalidConfiguration(format!("listen address: {e}")))?;

    let make_svc = make_service_fn(move |_conn| {
        let gateway = gateway.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(gateway.dispatch(req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| DomainError::Internal(format!("bind {addr}: {e}")))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { cancel.cancelled().await });

    info!(addr = %addr, "HTTP server listening (REST + gRPC-Web)");
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server terminated");
        return Err(DomainError::Internal(e.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grpc_web_request(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("content-type", "application/grpc-web+proto")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_is_grpc_web_by_content_type() {
        assert!(is_grpc_web(&grpc_web_request("/pkg.A/Foo")));
        let plain = Request::builder()
            .uri("/api/v1/processes")
            .body(Body::empty())
            .unwrap();
        assert!(!is_grpc_web(&plain));
        let text = Request::builder()
            .uri("/pkg.A/Foo")
            .header("content-type", "application/grpc-web-text")
            .body(Body::empty())
            .unwrap();
        assert!(is_grpc_web(&text));
    }

    #[test]
    fn test_proxy_target_extraction() {
        assert_eq!(proxy_target("/proxy/db_service/pkg.A/Foo"), Some("db_service"));
        assert_eq!(proxy_target("/proxy/db_service/"), None);
        assert_eq!(proxy_target("/proxy/db_service"), None);
        assert_eq!(proxy_target("/proxy//pkg.A/Foo"), None);
        assert_eq!(proxy_target("/pkg.A/Foo"), None);
    }
}
