use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use sentinel_store::{EffectQuery, Store};

use crate::error::ApiError;
use crate::state::AppState;

use super::{clamp_limit, clamp_offset, parse_filter, since_cutoff};

#[derive(Debug, Deserialize)]
pub struct EffectListParams {
    pub status: Option<String>,
    pub action_type: Option<String>,
    /// Seconds of recency; omitted means no cutoff.
    pub since: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/v1/effects` -- list recorded effects.
#[utoipa::path(
    get,
    path = "/api/v1/effects",
    tag = "Effects",
    summary = "List effects",
    responses((status = 200, description = "Effects, newest first"))
)]
pub async fn list_effects(
    State(state): State<AppState>,
    Query(params): Query<EffectListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = EffectQuery {
        status: parse_filter(params.status.as_deref(), "status")?,
        action_type: parse_filter(params.action_type.as_deref(), "action_type")?,
        since: params.since.and_then(|s| since_cutoff(Some(s), 0)),
        limit: clamp_limit(params.limit),
        offset: clamp_offset(params.offset),
    };
    let effects = state.store.list_effects(&query).await?;
    Ok(Json(json!({
        "count": effects.len(),
        "effects": effects,
    })))
}
