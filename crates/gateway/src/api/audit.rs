use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use sentinel_store::{AuditQuery, Store};

use crate::error::ApiError;
use crate::state::AppState;

use super::clamp_limit;

#[derive(Debug, Deserialize)]
pub struct AuditListParams {
    pub action_type: Option<String>,
    pub user_id: Option<String>,
    pub track_id: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /api/v1/audit` -- query the write-once audit log.
#[utoipa::path(
    get,
    path = "/api/v1/audit",
    tag = "Audit",
    summary = "List audit entries",
    responses((status = 200, description = "Audit entries, newest first"))
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = AuditQuery {
        action: params.action_type,
        actor_id: params.user_id,
        entity_id: params.track_id,
        limit: clamp_limit(params.limit),
    };
    let entries = state.store.list_audit(&query).await?;
    Ok(Json(json!({
        "count": entries.len(),
        "entries": entries,
    })))
}
