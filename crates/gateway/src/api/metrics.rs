use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use sentinel_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    /// Aggregation window in seconds.
    pub window: Option<i64>,
}

/// `GET /metrics` -- process counters in Prometheus text format.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Metrics",
    summary = "Prometheus counters",
    responses((status = 200, description = "Prometheus text exposition"))
)]
pub async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

/// `GET /api/v1/metrics` -- aggregated system metrics: store-wide totals
/// plus this process's counters.
#[utoipa::path(
    get,
    path = "/api/v1/metrics",
    tag = "Metrics",
    summary = "Aggregated metrics",
    responses((status = 200, description = "Store aggregates and process counters"))
)]
pub async fn summary(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let window = params.window.unwrap_or(60).max(1);
    let since = Utc::now() - Duration::seconds(window);
    let summary = state.store.metrics_summary(since).await?;
    Ok(Json(json!({
        "window_seconds": window,
        "summary": summary,
        "process": state.metrics.snapshot(),
    })))
}

/// `GET /api/v1/metrics/stages` -- per-stage throughput and latency
/// percentiles.
#[utoipa::path(
    get,
    path = "/api/v1/metrics/stages",
    tag = "Metrics",
    summary = "Per-stage metrics",
    responses((status = 200, description = "Stage throughput and latency"))
)]
pub async fn stages(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let window = params.window.unwrap_or(300).max(1);
    let since = Utc::now() - Duration::seconds(window);
    let stages = state.store.stage_metrics(since).await?;
    Ok(Json(json!({
        "window_seconds": window,
        "stages": stages,
    })))
}

/// `GET /api/v1/metrics/latency` -- end-to-end latency over a window
/// (default five minutes).
#[utoipa::path(
    get,
    path = "/api/v1/metrics/latency",
    tag = "Metrics",
    summary = "End-to-end latency",
    responses((status = 200, description = "Latency distribution"))
)]
pub async fn latency(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let window = params.window.unwrap_or(300).max(1);
    let since = Utc::now() - Duration::seconds(window);
    let latency = state.store.latency_summary(since).await?;
    Ok(Json(json!({
        "window_seconds": window,
        "latency": latency,
    })))
}
