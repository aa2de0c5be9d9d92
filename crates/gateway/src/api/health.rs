use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use sentinel_store::Store;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    dependencies: Dependencies,
    metrics: sentinel_pipeline::MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct Dependencies {
    store: &'static str,
}

/// `GET /health` -- liveness plus dependency status and a counter snapshot.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    summary = "Health check",
    responses((status = 200, description = "Service status with dependency health"))
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_status = match state.store.health_check().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };
    let status = if store_status == "ok" { "ok" } else { "degraded" };

    let body = HealthResponse {
        status,
        dependencies: Dependencies {
            store: store_status,
        },
        metrics: state.metrics.snapshot(),
    };
    let code = if status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
