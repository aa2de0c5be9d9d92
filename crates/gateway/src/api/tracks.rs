use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use sentinel_store::{Store, TrackQuery};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

use super::{clamp_limit, clamp_offset, parse_filter, since_cutoff};

#[derive(Debug, Deserialize)]
pub struct TrackListParams {
    pub classification: Option<String>,
    pub threat_level: Option<String>,
    #[serde(rename = "type")]
    pub track_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Seconds of recency; defaults to 60 ("active tracks"). Pass 0 to
    /// list everything regardless of age.
    pub since: Option<i64>,
}

/// `GET /api/v1/tracks` -- list active tracks.
///
/// The default `since` of 60 seconds means "active now"; full history is
/// reachable per track via `/api/v1/tracks/{id}/history`.
#[utoipa::path(
    get,
    path = "/api/v1/tracks",
    tag = "Tracks",
    summary = "List active tracks",
    responses((status = 200, description = "Tracks updated inside the window"))
)]
pub async fn list_tracks(
    State(state): State<AppState>,
    Query(params): Query<TrackListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = TrackQuery {
        classification: parse_filter(params.classification.as_deref(), "classification")?,
        threat_level: parse_filter(params.threat_level.as_deref(), "threat_level")?,
        track_type: parse_filter(params.track_type.as_deref(), "type")?,
        since: since_cutoff(params.since, 60),
        limit: clamp_limit(params.limit),
        offset: clamp_offset(params.offset),
    };
    let tracks = state.store.list_tracks(&query).await?;
    Ok(Json(json!({
        "count": tracks.len(),
        "tracks": tracks,
    })))
}

/// `GET /api/v1/tracks/{id}` -- one track with its recent position history.
#[utoipa::path(
    get,
    path = "/api/v1/tracks/{id}",
    tag = "Tracks",
    summary = "Get one track",
    responses(
        (status = 200, description = "Track with recent history"),
        (status = 404, description = "Unknown track id")
    )
)]
pub async fn get_track(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let track = state
        .store
        .get_track(&id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::TrackNotFound, format!("track not found: {id}")))?;
    let history = state.store.list_detections(&id, 20).await?;
    Ok(Json(json!({
        "track": track,
        "history": history,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// `GET /api/v1/tracks/{id}/history` -- full detection history for a track.
#[utoipa::path(
    get,
    path = "/api/v1/tracks/{id}/history",
    tag = "Tracks",
    summary = "Detection history",
    responses(
        (status = 200, description = "Detections, newest first"),
        (status = 404, description = "Unknown track id")
    )
)]
pub async fn track_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.get_track(&id).await?.is_none() {
        return Err(ApiError::new(
            ErrorCode::TrackNotFound,
            format!("track not found: {id}"),
        ));
    }
    let limit = params.limit.unwrap_or(1_000).clamp(1, 10_000);
    let detections = state.store.list_detections(&id, limit).await?;
    Ok(Json(json!({
        "track_id": id,
        "count": detections.len(),
        "detections": detections,
    })))
}
