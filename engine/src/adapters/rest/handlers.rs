//! REST API handlers using axum

use crate::constants::server::SHUTDOWN_RESPONSE_GRACE;
use crate::domain::entities::InstanceSnapshot;
use crate::domain::error::DomainError;
use crate::domain::services::{ProcessManager, UpdateManager};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::registry::RegistryState;

/// Shared state for the HTTP surface
pub struct HttpState {
    pub manager: Arc<ProcessManager>,
    pub update_manager: Arc<UpdateManager>,
    pub registry: Arc<RegistryState>,
    pub shutdown: tokio::sync::mpsc::Sender<()>,
}

pub type AppState = Arc<HttpState>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn domain_error(err: DomainError) -> ApiError {
    let status = match &err {
        DomainError::ProcessNotFound(_) | DomainError::InstanceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DomainError::MaxInstancesReached { .. }
        | DomainError::PortExhausted { .. }
        | DomainError::UpdateInProgress(_) => StatusCode::CONFLICT,
        DomainError::InvalidConfiguration(_)
        | DomainError::RepositoryNotConfigured(_)
        | DomainError::VersionNotInHistory { .. }
        | DomainError::NoPreviousVersion(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

// ===== Request/response bodies =====

#[derive(Deserialize, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Deserialize, Default)]
pub struct UpdateRequest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize, Default)]
pub struct RollbackRequest {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Serialize)]
pub struct ProcessStatusResponse {
    pub process: String,
    pub instances: Vec<InstanceSnapshot>,
    pub count: usize,
}

// ===== Handlers =====

/// GET /api/v1/processes
pub async fn list_processes(State(state): State<AppState>) -> Json<serde_json::Value> {
    let processes = state.manager.list();
    debug!(count = processes.len(), "REST list processes");
    Json(json!({
        "processes": processes,
        "count": processes.len(),
    }))
}

/// GET /api/v1/processes/:name/status
pub async fn process_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProcessStatusResponse>, ApiError> {
    let instances = state.manager.status(&name).map_err(domain_error)?;
    Ok(Json(ProcessStatusResponse {
        process: name,
        count: instances.len(),
        instances,
    }))
}

/// POST /api/v1/processes/:name/start
pub async fn start_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(process = %name, "REST start request");
    let instance = state.manager.start(&name).await.map_err(|e| {
        error!(process = %name, error = %e, "start failed");
        domain_error(e)
    })?;
    Ok(Json(json!({
        "message": "process started successfully",
        "instance": instance,
    })))
}

/// POST /api/v1/processes/:name/stop
pub async fn stop_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<StopRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body.unwrap_or_default();
    info!(process = %name, all = req.all, instance = ?req.instance_id, "REST stop request");

    if req.all {
        state.manager.stop_all(&name).await.map_err(domain_error)?;
    } else if let Some(instance_id) = req.instance_id.as_deref().filter(|id| !id.is_empty()) {
        state
            .manager
            .stop(&name, instance_id)
            .await
            .map_err(domain_error)?;
    } else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "either instance_id or all must be specified",
        ));
    }

    Ok(Json(json!({"message": "process stopped successfully"})))
}

/// POST /api/v1/processes/:name/update — 202 on acceptance
pub async fn update_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<UpdateRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(req) = body.unwrap_or_default();
    let version = req.version.unwrap_or_default();
    info!(process = %name, version = %version, force = req.force, "REST update request");

    let update_id = state
        .update_manager
        .update(&name, &version, req.force)
        .map_err(domain_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "update started",
            "process": name,
            "update_id": update_id,
        })),
    ))
}

/// GET /api/v1/processes/:name/version — active UpdateStatus, or a no-op
/// message when nothing is in flight
pub async fn process_version(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    match state.update_manager.status(&name) {
        Some(status) => Json(json!({
            "process": name,
            "update_status": status,
        })),
        None => Json(json!({
            "process": name,
            "message": "no update in progress",
        })),
    }
}

/// POST /api/v1/processes/:name/rollback — 202 on acceptance
pub async fn rollback_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<RollbackRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(req) = body.unwrap_or_default();
    let version = req.version.unwrap_or_default();
    info!(process = %name, version = %version, "REST rollback request");

    let rollback_id = state
        .update_manager
        .rollback(&name, &version)
        .await
        .map_err(domain_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "rollback started",
            "process": name,
            "rollback_id": rollback_id,
        })),
    ))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

/// POST /shutdown — answers immediately, then fires the shutdown signal
pub async fn shutdown(State(state): State<AppState>) -> Json<serde_json::Value> {
    info!("received graceful shutdown request via HTTP");
    let sender = state.shutdown.clone();
    tokio::spawn(async move {
        // Let the response flush before the listeners go away
        tokio::time::sleep(SHUTDOWN_RESPONSE_GRACE).await;
        let _ = sender.send(()).await;
    });
    Json(json!({"status": "shutting down"}))
}
