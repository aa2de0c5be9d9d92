//! Intervention-rules CRUD: the persisted table the planner consults to
//! decide whether an action needs a human.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use sentinel_core::{ActionType, Classification, ThreatLevel, TrackType};
use sentinel_store::{AuditRecord, InterventionRule, Store};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

use super::parse_uuid;

fn parse_set<T: std::str::FromStr<Err = String>>(
    values: Option<Vec<String>>,
    field: &str,
) -> Result<Option<Vec<T>>, ApiError> {
    values
        .map(|values| {
            values
                .iter()
                .map(|v| {
                    v.parse::<T>()
                        .map_err(|e| ApiError::validation(format!("{field}: {e}")))
                })
                .collect::<Result<Vec<T>, ApiError>>()
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
pub struct RuleListParams {
    pub enabled: Option<bool>,
}

/// `GET /api/v1/intervention-rules` -- list rules in evaluation order.
#[utoipa::path(
    get,
    path = "/api/v1/intervention-rules",
    tag = "Rules",
    summary = "List intervention rules",
    responses((status = 200, description = "Rules in evaluation order"))
)]
pub async fn list_rules(
    State(state): State<AppState>,
    Query(params): Query<RuleListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = state
        .store
        .list_rules(params.enabled.unwrap_or(false))
        .await?;
    Ok(Json(json!({
        "count": rules.len(),
        "rules": rules,
    })))
}

/// Create body: match sets default to empty (match anything).
#[derive(Debug, Deserialize)]
pub struct CreateRuleBody {
    pub name: Option<String>,
    pub action_types: Option<Vec<String>>,
    pub threat_levels: Option<Vec<String>>,
    pub classifications: Option<Vec<String>>,
    pub track_types: Option<Vec<String>>,
    pub min_priority: Option<u8>,
    pub max_priority: Option<u8>,
    pub requires_approval: Option<bool>,
    pub auto_approve: Option<bool>,
    pub enabled: Option<bool>,
    pub evaluation_order: Option<i32>,
}

/// `POST /api/v1/intervention-rules` -- create a rule.
#[utoipa::path(
    post,
    path = "/api/v1/intervention-rules",
    tag = "Rules",
    summary = "Create an intervention rule",
    responses(
        (status = 200, description = "Rule created"),
        (status = 400, description = "Validation failure")
    )
)]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(body): Json<CreateRuleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("name"))?;
    let requires_approval = body
        .requires_approval
        .ok_or_else(|| ApiError::missing_field("requires_approval"))?;
    let evaluation_order = body
        .evaluation_order
        .ok_or_else(|| ApiError::missing_field("evaluation_order"))?;

    let rule = InterventionRule {
        rule_id: Uuid::new_v4(),
        name,
        action_types: parse_set::<ActionType>(body.action_types, "action_types")?.unwrap_or_default(),
        threat_levels: parse_set::<ThreatLevel>(body.threat_levels, "threat_levels")?
            .unwrap_or_default(),
        classifications: parse_set::<Classification>(body.classifications, "classifications")?
            .unwrap_or_default(),
        track_types: parse_set::<TrackType>(body.track_types, "track_types")?.unwrap_or_default(),
        min_priority: body.min_priority,
        max_priority: body.max_priority,
        requires_approval,
        auto_approve: body.auto_approve.unwrap_or(false),
        enabled: body.enabled.unwrap_or(true),
        evaluation_order,
    };
    state.store.upsert_rule(&rule).await?;
    audit_rule(&state, &rule, "created").await;
    Ok(Json(json!({ "rule": rule })))
}

/// `GET /api/v1/intervention-rules/{id}` -- one rule.
#[utoipa::path(
    get,
    path = "/api/v1/intervention-rules/{id}",
    tag = "Rules",
    summary = "Get an intervention rule",
    responses(
        (status = 200, description = "The rule"),
        (status = 400, description = "Unknown rule")
    )
)]
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule_id = parse_uuid(&id)?;
    let rule = state
        .store
        .get_rule(rule_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::ValidationError, format!("rule not found: {id}")))?;
    Ok(Json(json!({ "rule": rule })))
}

/// `PATCH /api/v1/intervention-rules/{id}` -- partial update.
#[utoipa::path(
    patch,
    path = "/api/v1/intervention-rules/{id}",
    tag = "Rules",
    summary = "Update an intervention rule",
    responses(
        (status = 200, description = "Updated rule"),
        (status = 400, description = "Unknown rule")
    )
)]
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateRuleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule_id = parse_uuid(&id)?;
    let mut rule = state
        .store
        .get_rule(rule_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::ValidationError, format!("rule not found: {id}")))?;

    if let Some(name) = body.name {
        rule.name = name;
    }
    if let Some(set) = parse_set::<ActionType>(body.action_types, "action_types")? {
        rule.action_types = set;
    }
    if let Some(set) = parse_set::<ThreatLevel>(body.threat_levels, "threat_levels")? {
        rule.threat_levels = set;
    }
    if let Some(set) = parse_set::<Classification>(body.classifications, "classifications")? {
        rule.classifications = set;
    }
    if let Some(set) = parse_set::<TrackType>(body.track_types, "track_types")? {
        rule.track_types = set;
    }
    if body.min_priority.is_some() {
        rule.min_priority = body.min_priority;
    }
    if body.max_priority.is_some() {
        rule.max_priority = body.max_priority;
    }
    if let Some(requires) = body.requires_approval {
        rule.requires_approval = requires;
    }
    if let Some(auto) = body.auto_approve {
        rule.auto_approve = auto;
    }
    if let Some(enabled) = body.enabled {
        rule.enabled = enabled;
    }
    if let Some(order) = body.evaluation_order {
        rule.evaluation_order = order;
    }

    state.store.upsert_rule(&rule).await?;
    audit_rule(&state, &rule, "updated").await;
    Ok(Json(json!({ "rule": rule })))
}

/// `DELETE /api/v1/intervention-rules/{id}` -- remove a rule.
#[utoipa::path(
    delete,
    path = "/api/v1/intervention-rules/{id}",
    tag = "Rules",
    summary = "Delete an intervention rule",
    responses(
        (status = 200, description = "Rule deleted"),
        (status = 400, description = "Unknown rule")
    )
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule_id = parse_uuid(&id)?;
    if !state.store.delete_rule(rule_id).await? {
        return Err(ApiError::new(
            ErrorCode::ValidationError,
            format!("rule not found: {id}"),
        ));
    }
    let entry = AuditRecord::new("intervention_rule", rule_id.to_string(), "deleted", &state.agent_id);
    if let Err(e) = state.store.append_audit(&entry).await {
        warn!(error = %e, "audit append failed");
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn audit_rule(state: &AppState, rule: &InterventionRule, action: &str) {
    let entry = AuditRecord::new(
        "intervention_rule",
        rule.rule_id.to_string(),
        action,
        &state.agent_id,
    )
    .with_new_value(serde_json::to_value(rule).unwrap_or_default());
    if let Err(e) = state.store.append_audit(&entry).await {
        warn!(error = %e, "audit append failed");
    }
}
