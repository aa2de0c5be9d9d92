use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use sentinel_store::{DecisionQuery, Store};

use crate::error::ApiError;
use crate::state::AppState;

use super::{clamp_limit, clamp_offset, since_cutoff};

#[derive(Debug, Deserialize)]
pub struct DecisionListParams {
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    /// Seconds of recency; omitted means no cutoff.
    pub since: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/v1/decisions` -- list recorded decisions.
#[utoipa::path(
    get,
    path = "/api/v1/decisions",
    tag = "Decisions",
    summary = "List decisions",
    responses((status = 200, description = "Decisions, newest first"))
)]
pub async fn list_decisions(
    State(state): State<AppState>,
    Query(params): Query<DecisionListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = DecisionQuery {
        approved: params.approved,
        approved_by: params.approved_by,
        since: params.since.and_then(|s| since_cutoff(Some(s), 0)),
        limit: clamp_limit(params.limit),
        offset: clamp_offset(params.offset),
    };
    let decisions = state.store.list_decisions(&query).await?;
    Ok(Json(json!({
        "count": decisions.len(),
        "decisions": decisions,
    })))
}
