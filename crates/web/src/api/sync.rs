use axum::extract::State;
use axum::Json;
use gateway::auth::constant_time_eq;
use gateway::persist;
use serde::Deserialize;

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

/// Files another instance may replicate onto this one.
const SYNCABLE_FILES: &[&str] = &[
    "mileage.json",
    "vehicle_headings.json",
    "sent_alert_ids.json",
    "push_subscriptions.json",
    "system_notices.json",
    "tickets.json",
    "eink_block_layout.json",
    "config.json",
];

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub secret: String,
    pub name: String,
    pub content: String,
}

/// Peer replication: write a named persisted file into every data
/// directory, guarded by the shared sync secret.
pub async fn replicate(
    State(state): State<WebState>,
    Json(body): Json<SyncRequest>,
) -> RouteResult<Json<serde_json::Value>> {
    let Some(expected) = state.core.config.sync_secret.as_deref() else {
        return Err(RouteErrorResponse::unauthorized().with_message("Sync is not configured."));
    };
    if !constant_time_eq(body.secret.as_bytes(), expected.as_bytes()) {
        return Err(RouteErrorResponse::unauthorized());
    }

    if !SYNCABLE_FILES.contains(&body.name.as_str()) {
        return Err(RouteErrorResponse::bad_request(format!(
            "'{}' is not a replicable file.",
            body.name
        )));
    }

    for dir in &state.core.config.data_dirs {
        if let Err(why) = persist::write_atomic(dir, &body.name, body.content.as_bytes()).await {
            log::warn!("[sync] failed to write {} in {}: {why}", body.name, dir.display());
        }
    }

    log::info!("[sync] replicated {} ({} bytes)", body.name, body.content.len());
    Ok(Json(serde_json::json!({ "ok": true, "name": body.name })))
}
