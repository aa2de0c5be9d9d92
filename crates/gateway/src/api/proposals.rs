use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use sentinel_pipeline::DecideRequest;
use sentinel_store::{ProposalQuery, ProposalStatus, Store};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

use super::{clamp_limit, clamp_offset, parse_filter, parse_uuid};

#[derive(Debug, Deserialize)]
pub struct ProposalListParams {
    /// Defaults to `pending`; `all` lifts the filter.
    pub status: Option<String>,
    pub track_id: Option<String>,
    pub action_type: Option<String>,
    pub threat_level: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/v1/proposals` -- list proposals awaiting (or past) adjudication.
#[utoipa::path(
    get,
    path = "/api/v1/proposals",
    tag = "Proposals",
    summary = "List proposals",
    responses((status = 200, description = "Proposals, newest first"))
)]
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ProposalListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match params.status.as_deref() {
        None => Some(ProposalStatus::Pending),
        Some("all") => None,
        Some(raw) => Some(
            raw.parse::<ProposalStatus>()
                .map_err(|e| ApiError::validation(format!("status: {e}")))?,
        ),
    };
    let query = ProposalQuery {
        status,
        track_id: params.track_id,
        action_type: parse_filter(params.action_type.as_deref(), "action_type")?,
        threat_level: parse_filter(params.threat_level.as_deref(), "threat_level")?,
        limit: clamp_limit(params.limit),
        offset: clamp_offset(params.offset),
    };
    let proposals = state.store.list_proposals(&query).await?;
    Ok(Json(json!({
        "count": proposals.len(),
        "proposals": proposals,
    })))
}

/// `GET /api/v1/proposals/{id}` -- one proposal with its track embedded.
#[utoipa::path(
    get,
    path = "/api/v1/proposals/{id}",
    tag = "Proposals",
    summary = "Get one proposal",
    responses(
        (status = 200, description = "Proposal with embedded track"),
        (status = 400, description = "Malformed id"),
        (status = 404, description = "Unknown proposal")
    )
)]
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let proposal_id = parse_uuid(&id)?;
    let proposal = state
        .store
        .get_proposal(proposal_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::ProposalNotFound, format!("proposal not found: {id}"))
        })?;
    let track = state.store.get_track(&proposal.track_id).await?;
    let correlation_id = proposal.correlation_id;
    let mut response = json!({
        "proposal": proposal,
        "track": track,
    });
    if let Some(obj) = response.as_object_mut() {
        obj.insert("correlation_id".into(), json!(correlation_id));
    }
    Ok(Json(response))
}

/// Operator decision body.
#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub reason: Option<String>,
    pub conditions: Option<Vec<String>>,
}

/// `POST /api/v1/proposals/{id}/decide` -- adjudicate a pending proposal.
///
/// Runs the authorizer's decision intake: records the decision, flips the
/// proposal, publishes `decision.{approved|denied}.{action}`, and frees the
/// retained broker slot.
#[utoipa::path(
    post,
    path = "/api/v1/proposals/{id}/decide",
    tag = "Proposals",
    summary = "Decide a proposal",
    responses(
        (status = 200, description = "Decision recorded"),
        (status = 400, description = "Validation failure"),
        (status = 404, description = "Unknown proposal"),
        (status = 409, description = "Already decided or expired")
    )
)]
pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecideBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let proposal_id = parse_uuid(&id)?;
    let approved = body.approved.ok_or_else(|| ApiError::missing_field("approved"))?;
    let approved_by = body
        .approved_by
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("approved_by"))?;
    let reason = body
        .reason
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("reason"))?;

    let decision = state
        .authorizer
        .decide(
            proposal_id,
            DecideRequest {
                approved,
                approved_by,
                reason,
                conditions: body.conditions.unwrap_or_default(),
            },
        )
        .await?;
    Ok(Json(json!({ "decision": decision })))
}
