use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::json;
use tracing::{info, warn};

use sentinel_pipeline::sensor::{SensorConfigPatch, SensorControl};
use sentinel_store::{AuditRecord, Store};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

fn control(state: &AppState) -> Result<Arc<SensorControl>, ApiError> {
    state.sensor.clone().ok_or_else(|| {
        ApiError::new(
            ErrorCode::SensorUnavailable,
            "sensor control is not attached to this gateway process",
        )
    })
}

/// `GET /api/v1/sensor/config` -- the sensor's current configuration plus
/// the persisted emission counter.
#[utoipa::path(
    get,
    path = "/api/v1/sensor/config",
    tag = "Sensor",
    summary = "Sensor configuration",
    responses(
        (status = 200, description = "Current configuration"),
        (status = 503, description = "No sensor in this process")
    )
)]
pub async fn get_config(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let control = control(&state)?;
    let emitted = control.emitted_total().await?;
    Ok(Json(json!({
        "config": control.current(),
        "detections_emitted": emitted,
    })))
}

/// `PATCH /api/v1/sensor/config` -- atomically update any subset of the
/// configuration fields. Out-of-range values reject the whole patch.
#[utoipa::path(
    patch,
    path = "/api/v1/sensor/config",
    tag = "Sensor",
    summary = "Update sensor configuration",
    responses(
        (status = 200, description = "Merged configuration"),
        (status = 400, description = "A field failed validation"),
        (status = 503, description = "No sensor in this process")
    )
)]
pub async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<SensorConfigPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let control = control(&state)?;
    let previous = control.current();
    let next = control
        .patch(&patch)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let entry = AuditRecord::new("sensor", "config", "updated", &state.agent_id)
        .with_old_value(serde_json::to_value(&previous).unwrap_or_default())
        .with_new_value(serde_json::to_value(&next).unwrap_or_default());
    if let Err(e) = state.store.append_audit(&entry).await {
        warn!(error = %e, "audit append failed");
    }
    info!(?patch, "sensor configuration updated");
    Ok(Json(json!({ "config": next })))
}

/// `POST /api/v1/sensor/config/reset` -- restore the boot-time
/// configuration.
#[utoipa::path(
    post,
    path = "/api/v1/sensor/config/reset",
    tag = "Sensor",
    summary = "Reset sensor configuration",
    responses(
        (status = 200, description = "Defaults restored"),
        (status = 503, description = "No sensor in this process")
    )
)]
pub async fn reset_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let control = control(&state)?;
    let config = control.reset();
    let entry = AuditRecord::new("sensor", "config", "reset", &state.agent_id)
        .with_new_value(serde_json::to_value(&config).unwrap_or_default());
    if let Err(e) = state.store.append_audit(&entry).await {
        warn!(error = %e, "audit append failed");
    }
    Ok(Json(json!({ "config": config })))
}
