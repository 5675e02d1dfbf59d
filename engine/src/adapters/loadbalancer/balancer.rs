//! gRPC load balancer
//! Pattern-routed reverse proxy across healthy backends.
//!
//! Every method is served through a catch-all handler keyed by the method
//! name string: requests are forwarded at the HTTP/2 byte level (headers,
//! data frames, trailers), so unary and streaming calls of unknown services
//! proxy identically.

use crate::domain::error::{DomainError, Result};
use crate::domain::services::ProcessManager;
use crate::domain::value_objects::{InstanceStatus, Strategy};
use crate::infrastructure::config::LoadBalancerConfig;
use hyper::client::HttpConnector;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode, Uri};
use regex::Regex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// gRPC status codes surfaced by the proxy itself
const GRPC_UNIMPLEMENTED: u32 = 12;
const GRPC_UNAVAILABLE: u32 = 14;

struct RouteHandler {
    patterns: Vec<Regex>,
    targets: Vec<String>,
    strategy: Strategy,
    counter: AtomicU64,
}

impl RouteHandler {
    fn matches(&self, method: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(method))
    }

    fn select<'a>(&self, pool: &'a [String]) -> &'a str {
        match self.strategy {
            Strategy::Primary => &pool[0],
            // least_connections has no connection tracking yet and serves
            // as round-robin
            Strategy::RoundRobin | Strategy::LeastConnections => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                &pool[(n % pool.len() as u64) as usize]
            }
        }
    }
}

pub struct LoadBalancer {
    name: String,
    listen_port: u16,
    routes: Vec<RouteHandler>,
    manager: Arc<ProcessManager>,
    client: Client<HttpConnector, Body>,
}

impl LoadBalancer {
    pub fn new(config: &LoadBalancerConfig, manager: Arc<ProcessManager>) -> Result<Self> {
        let mut routes = Vec::with_capacity(config.routes.len());
        for (i, route) in config.routes.iter().enumerate() {
            let mut patterns = Vec::with_capacity(route.methods.len());
            for pattern in &route.methods {
                let re = Regex::new(pattern).map_err(|e| {
                    DomainError::InvalidConfiguration(format!(
                        "invalid method pattern {pattern:?} in route {i}: {e}"
                    ))
                })?;
                patterns.push(re);
            }
            routes.push(RouteHandler {
                patterns,
                targets: route.target_processes.clone(),
                strategy: route.strategy,
                counter: AtomicU64::new(0),
            });
        }

        Ok(Self {
            name: config.name.clone(),
            listen_port: config.listen_port,
            routes,
            manager,
            client: Client::builder().http2_only(true).build_http(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve until the token is cancelled (graceful stop)
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.listen_port));
        let lb = self.clone();
        let make_svc = make_service_fn(move |_conn| {
            let lb = lb.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let lb = lb.clone();
                    async move { Ok::<_, Infallible>(lb.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| DomainError::Internal(format!("bind {addr}: {e}")))?
            .http2_only(true)
            .serve(make_svc)
            .with_graceful_shutdown(async move { cancel.cancelled().await });

        info!(balancer = %self.name, port = self.listen_port, "load balancer listening");
        server
            .await
            .map_err(|e| DomainError::Internal(format!("load balancer {}: {e}", self.name)))
    }

    async fn handle(&self, mut req: Request<Body>) -> Response<Body> {
        let method = req.uri().path().to_string();

        let Some(route) = self.find_route(&method) else {
            return grpc_error_response(
                GRPC_UNIMPLEMENTED,
                &format!("no route found for method: {method}"),
            );
        };

        // Pool composition may change between selection and dial; best-effort
        let pool = self.backend_pool(&route.targets);
        if pool.is_empty() {
            return grpc_error_response(GRPC_UNAVAILABLE, "no healthy backends available");
        }
        let backend = route.select(&pool).to_string();

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or(method);
        let uri: Uri = match format!("http://{backend}{path_and_query}").parse() {
            Ok(uri) => uri,
            Err(e) => {
                return grpc_error_response(
                    GRPC_UNAVAILABLE,
                    &format!("invalid backend address {backend}: {e}"),
                )
            }
        };
        *req.uri_mut() = uri;
        // The backend sees its own :authority; incoming metadata rides the
        // remaining headers untouched
        req.headers_mut().remove(http::header::HOST);

        match self.client.request(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(balancer = %self.name, backend = %backend, error = %e, "backend dial failed");
                grpc_error_response(
                    GRPC_UNAVAILABLE,
                    &format!("failed to connect to backend {backend}: {e}"),
                )
            }
        }
    }

    /// First route whose pattern set matches, in declaration order
    fn find_route(&self, method: &str) -> Option<&RouteHandler> {
        self.routes.iter().find(|r| r.matches(method))
    }

    /// `localhost:<port>` for every running instance of every target
    fn backend_pool(&self, targets: &[String]) -> Vec<String> {
        let mut pool = Vec::new();
        for target in targets {
            let instances = match self.manager.status(target) {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(process = %target, error = %e, "failed to get backend status");
                    continue;
                }
            };
            for inst in instances {
                if inst.status == InstanceStatus::Running && inst.port > 0 {
                    pool.push(format!("localhost:{}", inst.port));
                }
            }
        }
        pool
    }
}

/// Trailers-only gRPC response: the status rides the headers frame
fn grpc_error_response(code: u32, message: &str) -> Response<Body> {
    use http::header::HeaderValue;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    if let Ok(value) = HeaderValue::from_str(&code.to_string()) {
        headers.insert("grpc-status", value);
    }
    if let Ok(value) = HeaderValue::from_str(&message.replace(['\r', '\n'], " ")) {
        headers.insert("grpc-message", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ProcessSpec;
    use crate::domain::ports::mocks::MockExecutor;
    use crate::domain::value_objects::RouteConfig;
    use tempfile::TempDir;

    fn lb_config(routes: Vec<RouteConfig>) -> LoadBalancerConfig {
        LoadBalancerConfig {
            name: "front".to_string(),
            listen_port: 0,
            protocol: "grpc".to_string(),
            routes,
        }
    }

    fn route(patterns: &[&str], targets: &[&str], strategy: Strategy) -> RouteConfig {
        RouteConfig {
            methods: patterns.iter().map(|s| s.to_string()).collect(),
            target_processes: targets.iter().map(|s| s.to_string()).collect(),
            strategy,
        }
    }

    fn empty_manager() -> Arc<ProcessManager> {
        Arc::new(ProcessManager::new(
            vec![ProcessSpec {
                name: "p1".to_string(),
                max_instances: 4,
                ..Default::default()
            }],
            Arc::new(MockExecutor::new()),
            "data",
            "binaries",
            CancellationToken::new(),
        ))
    }

    #[test]
    fn test_first_matching_route_wins() {
        let lb = LoadBalancer::new(
            &lb_config(vec![
                route(&[r"^/pkg\.A/.*$"], &["p1"], Strategy::Primary),
                route(&[r"^/.*$"], &["p2"], Strategy::Primary),
            ]),
            empty_manager(),
        )
        .unwrap();

        let r = lb.find_route("/pkg.A/Foo").unwrap();
        assert_eq!(r.targets, vec!["p1"]);
        let r = lb.find_route("/pkg.B/Foo").unwrap();
        assert_eq!(r.targets, vec!["p2"]);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = LoadBalancer::new(
            &lb_config(vec![route(&["["], &["p1"], Strategy::Primary)]),
            empty_manager(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_primary_strategy_selects_first() {
        let handler = RouteHandler {
            patterns: vec![],
            targets: vec![],
            strategy: Strategy::Primary,
            counter: AtomicU64::new(0),
        };
        let pool = vec!["localhost:7001".to_string(), "localhost:7002".to_string()];
        assert_eq!(handler.select(&pool), "localhost:7001");
        assert_eq!(handler.select(&pool), "localhost:7001");
    }

    #[test]
    fn test_round_robin_cycles_through_pool() {
        let handler = RouteHandler {
            patterns: vec![],
            targets: vec![],
            strategy: Strategy::RoundRobin,
            counter: AtomicU64::new(0),
        };
        let pool = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let picks: Vec<&str> = (0..6).map(|_| handler.select(&pool)).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_least_connections_falls_back_to_round_robin() {
        let handler = RouteHandler {
            patterns: vec![],
            targets: vec![],
            strategy: Strategy::LeastConnections,
            counter: AtomicU64::new(0),
        };
        let pool = vec!["a".to_string(), "b".to_string()];
        assert_eq!(handler.select(&pool), "a");
        assert_eq!(handler.select(&pool), "b");
        assert_eq!(handler.select(&pool), "a");
    }

    #[tokio::test]
    async fn test_unmatched_method_is_unimplemented() {
        let lb = LoadBalancer::new(
            &lb_config(vec![route(&[r"^/pkg\.A/.*$"], &["p1"], Strategy::Primary)]),
            empty_manager(),
        )
        .unwrap();

        let req = Request::builder()
            .uri("/other.Service/Method")
            .body(Body::empty())
            .unwrap();
        let response = lb.handle(req).await;
        assert_eq!(response.headers()["grpc-status"], "12");
    }

    #[tokio::test]
    async fn test_empty_pool_is_unavailable() {
        let lb = LoadBalancer::new(
            &lb_config(vec![route(&[r"^/.*$"], &["p1"], Strategy::Primary)]),
            empty_manager(),
        )
        .unwrap();

        let req = Request::builder()
            .uri("/pkg.A/Foo")
            .body(Body::empty())
            .unwrap();
        let response = lb.handle(req).await;
        assert_eq!(response.headers()["grpc-status"], "14");
    }

    #[tokio::test]
    async fn test_backend_pool_lists_running_instances() {
        let dirs = TempDir::new().unwrap();
        let data_dir = dirs.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("p1.env"), "K=v\n").unwrap();
        let bin = dirs.path().join("p1_v1.0.0.exe");
        std::fs::write(&bin, b"exe").unwrap();

        let manager = Arc::new(ProcessManager::new(
            vec![ProcessSpec {
                name: "p1".to_string(),
                binary_path: Some(bin),
                max_instances: 2,
                ..Default::default()
            }],
            Arc::new(MockExecutor::new()),
            data_dir,
            dirs.path().join("binaries"),
            CancellationToken::new(),
        ));
        let a = manager.start("p1").await.unwrap();
        let b = manager.start("p1").await.unwrap();

        let lb = LoadBalancer::new(
            &lb_config(vec![route(&[r"^/.*$"], &["p1"], Strategy::Primary)]),
            manager,
        )
        .unwrap();
        let pool = lb.backend_pool(&["p1".to_string()]);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&format!("localhost:{}", a.port)));
        assert!(pool.contains(&format!("localhost:{}", b.port)));
    }
}
