//! Reflection registry and dynamic invocation endpoints
//! `/api/grpc/registry` serves the proxiable-process catalog;
//! `/api/grpc/invoke` executes a method through a gRPC-curl-style tool.

use crate::constants::registry::{CACHE_TTL, INVOKE_TIMEOUT};
use crate::domain::services::ProcessManager;
use crate::domain::value_objects::{InstanceStatus, MessageSchema, ServiceCatalog, ServiceSchema};
use crate::infrastructure::ReflectionClient;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

use super::handlers::AppState;

pub struct RegistryState {
    manager: Arc<ProcessManager>,
    reflection: ReflectionClient,
    base_url: String,
    skip_services: Vec<String>,
    skip_messages: Vec<String>,
    /// Read-mostly catalog cache; entries share one expiry instant
    cache: RwLock<HashMap<String, ServiceCatalog>>,
    expiry: RwLock<Option<Instant>>,
}

impl RegistryState {
    pub fn new(
        manager: Arc<ProcessManager>,
        base_url: String,
        skip_services: Vec<String>,
        skip_messages: Vec<String>,
    ) -> Self {
        Self {
            manager,
            reflection: ReflectionClient::new(),
            base_url,
            skip_services,
            skip_messages,
            cache: RwLock::new(HashMap::new()),
            expiry: RwLock::new(None),
        }
    }

    /// Catalog for one process, from cache or a fresh harvest against the
    /// first running instance's port. Stale reads are acceptable until the
    /// shared TTL expires.
    async fn catalog(&self, name: &str, port: u16) -> Option<ServiceCatalog> {
        let fresh = self
            .expiry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false);
        if fresh {
            if let Some(catalog) = self
                .cache
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(name)
            {
                return Some(catalog.clone());
            }
        }

        let address = format!("127.0.0.1:{port}");
        let harvested = match self.reflection.service_catalog(&address).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(process = %name, address = %address, error = %e, "reflection harvest failed");
                return None;
            }
        };
        let filtered = filter_catalog(harvested, &self.skip_services, &self.skip_messages);

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), filtered.clone());
        *self.expiry.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Instant::now() + CACHE_TTL);
        debug!(process = %name, services = filtered.services.len(), "catalog harvested");
        Some(filtered)
    }
}

/// Drop services and messages whose name starts with a configured prefix
fn filter_catalog(
    catalog: ServiceCatalog,
    skip_services: &[String],
    skip_messages: &[String],
) -> ServiceCatalog {
    let services = catalog
        .services
        .into_iter()
        .filter(|s| !skip_services.iter().any(|prefix| s.name.starts_with(prefix)))
        .collect();
    let messages = catalog
        .messages
        .into_iter()
        .filter(|(name, _)| !skip_messages.iter().any(|prefix| name.starts_with(prefix)))
        .collect();
    ServiceCatalog { services, messages }
}

// ===== /api/grpc/registry =====

#[derive(Serialize)]
pub struct RegistryProcessInfo {
    pub name: String,
    pub display_name: String,
    pub status: String,
    pub instances: usize,
    pub proxy_path: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceSchema>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub messages: HashMap<String, MessageSchema>,
}

#[derive(Serialize)]
pub struct RegistryResponse {
    pub proxy_base_url: String,
    pub available_processes: Vec<RegistryProcessInfo>,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/grpc/registry
pub async fn get_registry(State(state): State<AppState>) -> Json<RegistryResponse> {
    let registry = &state.registry;
    let mut available = Vec::new();

    for name in registry.manager.list() {
        let Ok(instances) = registry.manager.status(&name) else {
            continue;
        };
        let repository = registry.manager.repository_of(&name).unwrap_or_default();

        let ports: Vec<u16> = instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Running && i.port > 0)
            .map(|i| i.port)
            .collect();

        let status = if ports.is_empty() { "stopped" } else { "running" };
        let catalog = match ports.first() {
            Some(port) => registry.catalog(&name, *port).await,
            None => None,
        };
        let (services, messages) = catalog
            .map(|c| (c.services, c.messages))
            .unwrap_or_default();

        available.push(RegistryProcessInfo {
            display_name: name.clone(),
            proxy_path: format!("/proxy/{name}"),
            name,
            status: status.to_string(),
            instances: ports.len(),
            repository,
            current_ports: ports,
            services,
            messages,
        });
    }

    Json(RegistryResponse {
        proxy_base_url: registry.base_url.clone(),
        available_processes: available,
        timestamp: Utc::now(),
    })
}

// ===== /api/grpc/invoke =====

#[derive(Deserialize)]
pub struct InvokeRequest {
    pub process: String,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct InvokeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn invoke_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<InvokeResponse>) {
    (
        status,
        Json(InvokeResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
}

/// POST /api/grpc/invoke
pub async fn invoke_method(
    State(state): State<AppState>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, (StatusCode, Json<InvokeResponse>)> {
    if req.process.is_empty() || req.service.is_empty() || req.method.is_empty() {
        return Err(invoke_error(
            StatusCode::BAD_REQUEST,
            "missing required fields: process, service, method",
        ));
    }

    let instances = state.manager.status(&req.process).map_err(|_| {
        invoke_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("process {} is not running", req.process),
        )
    })?;
    let Some(port) = instances
        .iter()
        .find(|i| i.status == InstanceStatus::Running && i.port > 0)
        .map(|i| i.port)
    else {
        return Err(invoke_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("process {} is not running", req.process),
        ));
    };

    let address = format!("127.0.0.1:{port}");
    debug!(
        process = %req.process,
        service = %req.service,
        method = %req.method,
        address = %address,
        "invoking gRPC method"
    );

    let data = match invoke_with_grpcurl(&address, &req.service, &req.method, &req.data).await {
        Ok(data) => data,
        Err(e) => {
            return Err(invoke_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to invoke method: {e}"),
            ))
        }
    };

    Ok(Json(InvokeResponse {
        success: true,
        data: Some(data),
        error: None,
    }))
}

/// Shell out to `grpcurl` in plaintext JSON mode and parse its stdout
async fn invoke_with_grpcurl(
    address: &str,
    service: &str,
    method: &str,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, String> {
    let payload = serde_json::to_string(data).map_err(|e| e.to_string())?;
    let full_method = format!("{service}/{method}");

    let command = tokio::process::Command::new("grpcurl")
        .args(["-plaintext", "-format", "json", "-d", &payload, address, &full_method])
        .output();
    let output = tokio::time::timeout(INVOKE_TIMEOUT, command)
        .await
        .map_err(|_| "grpcurl timed out".to_string())?
        .map_err(|e| format!("grpcurl failed to launch: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("grpcurl failed: {stderr}"));
    }
    serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("failed to parse grpcurl output: {e}"))
}
