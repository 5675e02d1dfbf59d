//! Release webhook endpoint
//! Accepts GitHub release events and starts updates for every managed
//! process pointing at the published repository.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::handlers::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GithubWebhookPayload {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub release: ReleasePayload,
    #[serde(default)]
    pub repository: RepositoryPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleasePayload {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepositoryPayload {
    #[serde(default)]
    pub full_name: String,
}

/// POST /webhook/github
pub async fn github_webhook(
    State(state): State<AppState>,
    Json(payload): Json<GithubWebhookPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    if payload.action != "published" && payload.action != "released" {
        info!(action = %payload.action, "ignoring webhook action");
        return (
            StatusCode::OK,
            Json(json!({"message": "ignored", "action": payload.action})),
        );
    }
    if payload.release.draft || payload.release.prerelease {
        info!(tag = %payload.release.tag_name, "ignoring draft/prerelease");
        return (
            StatusCode::OK,
            Json(json!({"message": "ignored draft/prerelease"})),
        );
    }

    let repository = payload.repository.full_name;
    let tag = payload.release.tag_name;
    info!(repository = %repository, tag = %tag, "received release webhook");

    // Every managed process configured with this repository gets an update
    let mut triggered = Vec::new();
    for name in state.manager.list() {
        if state.manager.repository_of(&name).as_deref() != Some(repository.as_str()) {
            continue;
        }
        match state.update_manager.update(&name, &tag, false) {
            Ok(update_id) => triggered.push(json!({"process": name, "update_id": update_id})),
            Err(e) => {
                warn!(process = %name, error = %e, "webhook update rejected");
                triggered.push(json!({"process": name, "error": e.to_string()}));
            }
        }
    }

    if triggered.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({
                "message": "no managed process for repository",
                "repository": repository,
            })),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "webhook received",
            "repository": repository,
            "version": tag,
            "updates": triggered,
        })),
    )
}
