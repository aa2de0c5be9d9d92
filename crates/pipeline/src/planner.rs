//! Planner worker: turns correlated tracks into action proposals and
//! decides, via the intervention-rules table, whether a human must
//! adjudicate. Passive outcomes never emit a proposal.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use sentinel_broker::Delivery;
use sentinel_core::{
    ActionType, Classification, CorrelatedTrack, Message, PolicyDecision, Proposal, ThreatLevel,
    TrackType,
};
use sentinel_policy::{PolicyClient, PolicyPath};
use sentinel_store::{InterventionRule, Store};

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::runtime::{MessageHandler, WorkerError, attest, decode, publish_message};

/// The planner decision table, keyed on (classification, threat level,
/// type). Returns `(action, priority)`.
#[must_use]
pub fn plan_action(
    classification: Classification,
    threat: ThreatLevel,
    track_type: TrackType,
) -> (ActionType, u8) {
    use Classification::{Friendly, Hostile, Neutral, Unknown};
    use ThreatLevel as T;

    match (classification, threat, track_type) {
        (Hostile, T::Critical, TrackType::Missile) => (ActionType::Engage, 10),
        (Hostile, T::Critical, _) => (ActionType::Intercept, 9),
        (Hostile, T::High, _) => (ActionType::Intercept, 8),
        (Unknown, T::High, _) => (ActionType::Identify, 7),
        (Hostile, T::Medium, _) => (ActionType::Track, 6),
        (Unknown, T::Medium, _) => (ActionType::Identify, 5),
        (Friendly, T::Low, _) => (ActionType::Monitor, 2),
        (Neutral, T::Low, _) => (ActionType::Monitor, 3),
        _ => (ActionType::Track, 4),
    }
}

/// Operational constraints attached to a proposed action.
#[must_use]
pub fn action_constraints(action: ActionType) -> Vec<String> {
    match action {
        ActionType::Engage => vec![
            "weapons release only after explicit approval".to_string(),
            "confirm hostile classification before commit".to_string(),
            "abort on loss of positive track".to_string(),
        ],
        ActionType::Intercept => vec![
            "maintain minimum safe separation".to_string(),
            "escort to boundary if compliant".to_string(),
        ],
        ActionType::Identify => vec![
            "passive sensors preferred".to_string(),
            "no closer than five nautical miles".to_string(),
        ],
        ActionType::Track => vec!["maintain sensor custody".to_string()],
        ActionType::Monitor | ActionType::Ignore => vec![],
    }
}

/// Adjudication deadline from priority: ≥9 → 10 min, ≥7 → 15 min,
/// ≥5 → 30 min, else 60 min.
#[must_use]
pub fn expiry_minutes(priority: u8) -> i64 {
    match priority {
        9.. => 10,
        7..=8 => 15,
        5..=6 => 30,
        _ => 60,
    }
}

/// The fixed gating ladder used when the rules table is unreachable:
/// kinetic actions always need a human, identify needs one from priority 6,
/// passive actions never do, and anything unrecognized fails safe.
#[must_use]
pub fn fallback_requires_approval(action: ActionType, priority: u8) -> bool {
    match action {
        ActionType::Engage | ActionType::Intercept => true,
        ActionType::Identify => priority >= 6,
        ActionType::Track | ActionType::Monitor | ActionType::Ignore => false,
    }
}

/// Evaluate the rules table: first matching row (ascending
/// `evaluation_order`) decides. `None` when no row matches.
#[must_use]
pub fn evaluate_rules(
    rules: &[InterventionRule],
    action: ActionType,
    threat: ThreatLevel,
    classification: Classification,
    track_type: TrackType,
    priority: u8,
) -> Option<bool> {
    rules
        .iter()
        .find(|rule| rule.matches(action, threat, classification, track_type, priority))
        .map(|rule| rule.requires_approval)
}

/// The planner worker.
pub struct Planner {
    ctx: WorkerContext,
}

impl Planner {
    #[must_use]
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Whether this proposal must cross the human gate. Falls back to the
    /// fixed ladder when the rules table cannot be read.
    async fn requires_approval(&self, proposal: &Proposal) -> bool {
        match self.ctx.store.list_rules(true).await {
            Ok(rules) => evaluate_rules(
                &rules,
                proposal.action_type,
                proposal.threat_level,
                proposal.classification,
                proposal.track.track_type,
                proposal.priority,
            )
            .unwrap_or_else(|| {
                fallback_requires_approval(proposal.action_type, proposal.priority)
            }),
            Err(e) => {
                warn!(error = %e, "rules table unreachable, using fallback gating");
                fallback_requires_approval(proposal.action_type, proposal.priority)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let track: CorrelatedTrack = decode(&delivery.payload)?;
        attest(&track, &self.ctx.signing_secret)?;

        let (action, priority) = plan_action(track.classification, track.threat_level, track.track_type);
        let rationale = format!(
            "{} {} assessed {} threat; planned {}",
            track.classification, track.track_type, track.threat_level, action
        );
        let expires_at = Utc::now() + ChronoDuration::minutes(expiry_minutes(priority));

        let mut proposal = Proposal::new(
            &track,
            &self.ctx.agent_id,
            action,
            priority,
            rationale,
            action_constraints(action),
            expires_at,
        );
        proposal.envelope.policy_version.clone_from(&self.ctx.policy_version);

        if !self.requires_approval(&proposal).await {
            PipelineMetrics::incr(&self.ctx.metrics.planner_proposals_suppressed);
            debug!(
                track_id = %proposal.track_id,
                action = %action,
                priority,
                "passive or auto-cleared action, no proposal emitted"
            );
            return Ok(());
        }

        // Pre-check with the policy engine. A denial is carried on the
        // proposal, not suppressed: operators must see the violation. An
        // unreachable engine becomes a warning because the proposal still
        // crosses the human gate.
        let input = serde_json::to_value(&proposal).map_err(WorkerError::from)?;
        proposal.policy_decision = match self.ctx.policy.check(PolicyPath::ProposalRules, &input).await
        {
            Ok(verdict) => Some(verdict),
            Err(e) => Some(PolicyDecision::allow_with_warning(format!(
                "policy engine unavailable: {e}"
            ))),
        };

        proposal
            .sign(&self.ctx.signing_secret)
            .map_err(|e| WorkerError::Transient(e.to_string()))?;
        publish_message(self.ctx.broker.as_ref(), &proposal).await?;
        PipelineMetrics::incr(&self.ctx.metrics.planner_proposals_published);
        debug!(
            proposal_id = %proposal.proposal_id,
            track_id = %proposal.track_id,
            action = %action,
            priority,
            bucket = %proposal.bucket(),
            "proposal published"
        );
        Ok(())
    }
}
