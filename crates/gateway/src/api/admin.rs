use axum::Json;
use axum::extract::State;
use serde_json::json;
use tracing::warn;

use sentinel_pipeline::topology;
use sentinel_store::{AuditRecord, Store};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/v1/clear` -- wipe all pipeline data and purge the streams.
/// Development only: there is no undo.
#[utoipa::path(
    post,
    path = "/api/v1/clear",
    tag = "Admin",
    summary = "Clear all pipeline data (development only)",
    responses((status = 200, description = "Store and streams cleared"))
)]
pub async fn clear(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.clear_all().await?;
    topology::clear_streams(state.broker.as_ref()).await?;

    let entry = AuditRecord::new("system", "all", "cleared", &state.agent_id);
    if let Err(e) = state.store.append_audit(&entry).await {
        warn!(error = %e, "audit append failed");
    }
    warn!("all pipeline data cleared");
    Ok(Json(json!({ "status": "cleared" })))
}
