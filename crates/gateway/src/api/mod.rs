pub mod admin;
pub mod audit;
pub mod decisions;
pub mod effects;
pub mod health;
pub mod metrics;
pub mod openapi;
pub mod proposals;
pub mod rules;
pub mod sensor;
pub mod tracks;
pub mod ws;

use std::str::FromStr;

use axum::Router;
use axum::routing::{get, post};
use chrono::{DateTime, Duration, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

use self::openapi::ApiDoc;

/// Build the Axum router with all API routes, middleware, and Swagger UI.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::prometheus))
        .route("/api/v1/tracks", get(tracks::list_tracks))
        .route("/api/v1/tracks/{id}", get(tracks::get_track))
        .route("/api/v1/tracks/{id}/history", get(tracks::track_history))
        .route("/api/v1/proposals", get(proposals::list_proposals))
        .route("/api/v1/proposals/{id}", get(proposals::get_proposal))
        .route("/api/v1/proposals/{id}/decide", post(proposals::decide))
        .route("/api/v1/decisions", get(decisions::list_decisions))
        .route("/api/v1/effects", get(effects::list_effects))
        .route("/api/v1/audit", get(audit::list_audit))
        .route("/api/v1/metrics", get(metrics::summary))
        .route("/api/v1/metrics/stages", get(metrics::stages))
        .route("/api/v1/metrics/latency", get(metrics::latency))
        .route("/api/v1/clear", post(admin::clear))
        .route(
            "/api/v1/sensor/config",
            get(sensor::get_config).patch(sensor::patch_config),
        )
        .route("/api/v1/sensor/config/reset", post(sensor::reset_config))
        .route(
            "/api/v1/intervention-rules",
            get(rules::list_rules).post(rules::create_rule),
        )
        .route(
            "/api/v1/intervention-rules/{id}",
            get(rules::get_rule)
                .patch(rules::update_rule)
                .delete(rules::delete_rule),
        )
        .route("/ws", get(ws::ws))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Parse an optional enum-valued query parameter.
pub(crate) fn parse_filter<T>(value: Option<&str>, field: &str) -> Result<Option<T>, ApiError>
where
    T: FromStr<Err = String>,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| ApiError::validation(format!("{field}: {e}")))
        })
        .transpose()
}

/// Parse a path UUID.
pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::invalid_uuid(value))
}

/// Turn a seconds-ago parameter into an absolute cutoff. `Some(0)` disables
/// the cutoff entirely.
pub(crate) fn since_cutoff(seconds: Option<i64>, default_seconds: i64) -> Option<DateTime<Utc>> {
    match seconds {
        Some(0) => None,
        Some(s) => Some(Utc::now() - Duration::seconds(s)),
        None => Some(Utc::now() - Duration::seconds(default_seconds)),
    }
}

pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(100).clamp(1, 1_000)
}

pub(crate) fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}
