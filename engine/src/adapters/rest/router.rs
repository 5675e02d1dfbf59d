//! REST API router configuration

use super::handlers::{
    health, list_processes, process_status, process_version, rollback_process, shutdown,
    start_process, stop_process, update_process, AppState,
};
use super::registry::{get_registry, invoke_method};
use super::webhook::github_webhook;
use axum::routing::{get, post};
use axum::Router;

/// Build the REST API router served on the shared HTTP listener
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Process control
        .route("/api/v1/processes", get(list_processes))
        .route("/api/v1/processes/:name/status", get(process_status))
        .route("/api/v1/processes/:name/start", post(start_process))
        .route("/api/v1/processes/:name/stop", post(stop_process))
        // Updates
        .route("/api/v1/processes/:name/update", post(update_process))
        .route("/api/v1/processes/:name/version", get(process_version))
        .route("/api/v1/processes/:name/rollback", post(rollback_process))
        // Reflection registry and dynamic invocation
        .route("/api/grpc/registry", get(get_registry))
        .route("/api/grpc/invoke", post(invoke_method))
        // Release webhook
        .route("/webhook/github", post(github_webhook))
        // Liveness + shutdown
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}
