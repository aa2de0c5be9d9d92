//! Effector worker: executes approved decisions exactly once.
//!
//! The idempotent-key lookup gates execution and the effect write is
//! conflict-free (`INSERT .. ON CONFLICT DO NOTHING`), so the externally
//! visible effect happens at most once per (decision, proposal, action)
//! even under arbitrary broker redelivery.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use sentinel_broker::Delivery;
use sentinel_core::{
    Decision, Effect, EffectStatus, Message, idempotent_key,
};
use sentinel_policy::{PolicyClient, PolicyPath};
use sentinel_store::{AuditRecord, EffectRecord, ProposalRecord, Store};

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::runtime::{MessageHandler, WorkerError, attest, decode, publish_message};

/// Whether the effector drives the (synthetic) actuation layer or only
/// records what would have happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Live,
    Simulate,
}

/// The release checks that must all pass before execution. Returns every
/// violated check so operators see the full picture, not just the first.
#[must_use]
pub fn release_violations(
    decision: &Decision,
    proposal: Option<&ProposalRecord>,
    now: chrono::DateTime<Utc>,
) -> Vec<String> {
    let mut violations = Vec::new();
    if !decision.approved {
        violations.push("decision is not an approval".to_string());
    }
    if decision.approved_by.trim().is_empty() {
        violations.push("approved_by is empty".to_string());
    }
    if decision.approved_by == "system" {
        violations.push("approved_by must identify a human operator".to_string());
    }
    match proposal {
        None => violations.push("originating proposal not found".to_string()),
        Some(proposal) => {
            if proposal.expires_at <= now {
                violations.push("proposal expired before execution".to_string());
            }
            if decision.proposal_id != proposal.proposal_id {
                violations.push("decision does not reference this proposal".to_string());
            }
        }
    }
    violations
}

/// The effector worker.
pub struct Effector {
    ctx: WorkerContext,
    mode: ExecutionMode,
}

impl Effector {
    #[must_use]
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            mode: ExecutionMode::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Drive the synthetic actuation layer.
    fn execute(&self, decision: &Decision) -> Result<(EffectStatus, String), String> {
        let summary = format!(
            "{} executed against track {} per decision {}",
            decision.action_type, decision.track_id, decision.decision_id
        );
        match self.mode {
            ExecutionMode::Live => Ok((EffectStatus::Executed, summary)),
            ExecutionMode::Simulate => Ok((EffectStatus::Simulated, summary)),
        }
    }

    async fn write_and_publish(&self, effect: &Effect) -> Result<(), WorkerError> {
        let record = EffectRecord {
            effect_id: effect.effect_id,
            decision_id: effect.decision_id,
            proposal_id: effect.proposal_id,
            track_id: effect.track_id.clone(),
            action_type: effect.action_type,
            status: effect.status,
            result: effect.result.clone(),
            idempotent_key: effect.idempotent_key.clone(),
            executed_at: effect.executed_at,
            correlation_id: effect.envelope.correlation_id,
            created_at: Utc::now(),
        };

        // Two racing effectors cannot double-write: the second insert hits
        // the unique key and backs off without publishing.
        let written = match self.ctx.store.insert_effect(&record).await {
            Ok(written) => written,
            Err(e) if e.is_unique_violation() => false,
            Err(e) => return Err(e.into()),
        };
        if !written {
            PipelineMetrics::incr(&self.ctx.metrics.effector_effects_idempotent);
            debug!(
                idempotent_key = %record.idempotent_key,
                "effect already recorded by a concurrent writer"
            );
            return Ok(());
        }

        let entry = AuditRecord::new(
            "effect",
            record.effect_id.to_string(),
            record.status.as_str(),
            &self.ctx.agent_id,
        )
        .with_new_value(serde_json::json!({
            "decision_id": record.decision_id,
            "track_id": record.track_id,
            "action_type": record.action_type,
            "result": record.result,
        }))
        .with_correlation(record.correlation_id);
        if let Err(e) = self.ctx.store.append_audit(&entry).await {
            warn!(error = %e, "audit append failed");
        }

        publish_message(self.ctx.broker.as_ref(), effect).await?;
        match effect.status {
            EffectStatus::Failed => {
                PipelineMetrics::incr(&self.ctx.metrics.effector_effects_failed);
            }
            _ => {
                PipelineMetrics::incr(&self.ctx.metrics.effector_effects_executed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Effector {
    fn name(&self) -> &'static str {
        "effector"
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let decision: Decision = decode(&delivery.payload)?;
        attest(&decision, &self.ctx.signing_secret)?;

        // The consumer filter only admits decision.approved.>, but a denial
        // slipping through must never execute.
        if !decision.approved {
            debug!(decision_id = %decision.decision_id, "denied decision ignored");
            return Ok(());
        }

        let key = idempotent_key(decision.decision_id, decision.proposal_id, decision.action_type);
        if self.ctx.store.get_effect_by_key(&key).await?.is_some() {
            PipelineMetrics::incr(&self.ctx.metrics.effector_effects_idempotent);
            debug!(idempotent_key = %key, "redelivery of an executed decision, skipping");
            return Ok(());
        }

        let proposal = self.ctx.store.get_proposal(decision.proposal_id).await?;

        // Local release checks plus the policy engine's effects/release
        // path. Policy errors fail closed here: this is the last gate
        // before an externally visible effect.
        let mut violations = release_violations(&decision, proposal.as_ref(), Utc::now());
        if violations.is_empty() {
            let input = serde_json::json!({
                "decision": decision,
                "proposal": proposal,
            });
            match self.ctx.policy.check(PolicyPath::EffectsRelease, &input).await {
                Ok(verdict) if !verdict.allowed => {
                    violations.extend(verdict.violations);
                    if violations.is_empty() {
                        violations.push("policy denied effect release".to_string());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    violations.push(format!("policy engine unavailable, failing closed: {e}"));
                }
            }
        }

        if !violations.is_empty() {
            warn!(
                decision_id = %decision.decision_id,
                ?violations,
                "effect release blocked"
            );
            let mut effect = Effect::new(
                &decision.envelope,
                &self.ctx.agent_id,
                decision.decision_id,
                decision.proposal_id,
                decision.track_id.clone(),
                decision.action_type,
                EffectStatus::Failed,
                Some(violations.join("; ")),
            );
            effect
                .sign(&self.ctx.signing_secret)
                .map_err(|e| WorkerError::Transient(e.to_string()))?;
            // Policy denial is not retryable: record, publish, ack.
            self.write_and_publish(&effect).await?;
            return Ok(());
        }

        let (status, result) = match self.execute(&decision) {
            Ok(done) => done,
            Err(e) => {
                // Execution errors are transient: the broker redelivers up
                // to the consumer's max-delivery count.
                return Err(WorkerError::Transient(e));
            }
        };

        let mut effect = Effect::new(
            &decision.envelope,
            &self.ctx.agent_id,
            decision.decision_id,
            decision.proposal_id,
            decision.track_id.clone(),
            decision.action_type,
            status,
            Some(result),
        );
        effect
            .sign(&self.ctx.signing_secret)
            .map_err(|e| WorkerError::Transient(e.to_string()))?;
        self.write_and_publish(&effect).await?;
        info!(
            effect_id = %effect.effect_id,
            decision_id = %decision.decision_id,
            track_id = %decision.track_id,
            action = %decision.action_type,
            status = %effect.status,
            "effect recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sentinel_core::{ActionType, Envelope, SourceType, ThreatLevel};
    use sentinel_store::ProposalStatus;
    use uuid::Uuid;

    fn decision(approved: bool, approved_by: &str, proposal_id: Uuid) -> Decision {
        Decision::new(
            &Envelope::root("authorizer-1", SourceType::Authorizer),
            "authorizer-1",
            proposal_id,
            "H-TRK-0001",
            ActionType::Engage,
            approved,
            approved_by,
            "confirmed hostile",
            vec![],
        )
    }

    fn proposal(proposal_id: Uuid, expires_in_secs: i64) -> ProposalRecord {
        ProposalRecord {
            proposal_id,
            track_id: "H-TRK-0001".into(),
            action_type: ActionType::Engage,
            priority: 10,
            threat_level: ThreatLevel::Critical,
            rationale: "hostile missile".into(),
            constraints: vec![],
            track_data: serde_json::Value::Null,
            policy_decision: None,
            status: ProposalStatus::Approved,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            hit_count: 1,
            last_hit_at: None,
            correlation_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_checks_pass() {
        let id = Uuid::new_v4();
        let violations =
            release_violations(&decision(true, "op-001", id), Some(&proposal(id, 600)), Utc::now());
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn unapproved_decision_blocked() {
        let id = Uuid::new_v4();
        let violations =
            release_violations(&decision(false, "op-001", id), Some(&proposal(id, 600)), Utc::now());
        assert!(violations.iter().any(|v| v.contains("not an approval")));
    }

    #[test]
    fn system_approver_blocked() {
        let id = Uuid::new_v4();
        for approver in ["", "system"] {
            let violations = release_violations(
                &decision(true, approver, id),
                Some(&proposal(id, 600)),
                Utc::now(),
            );
            assert!(!violations.is_empty(), "approver {approver:?} must be blocked");
        }
    }

    #[test]
    fn expired_proposal_blocked() {
        let id = Uuid::new_v4();
        let violations =
            release_violations(&decision(true, "op-001", id), Some(&proposal(id, -1)), Utc::now());
        assert!(violations.iter().any(|v| v.contains("expired")));
    }

    #[test]
    fn missing_proposal_blocked() {
        let violations =
            release_violations(&decision(true, "op-001", Uuid::new_v4()), None, Utc::now());
        assert!(violations.iter().any(|v| v.contains("not found")));
    }

    #[test]
    fn mismatched_proposal_blocked() {
        let violations = release_violations(
            &decision(true, "op-001", Uuid::new_v4()),
            Some(&proposal(Uuid::new_v4(), 600)),
            Utc::now(),
        );
        assert!(
            violations
                .iter()
                .any(|v| v.contains("does not reference"))
        );
    }
}
