use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::envelope::{Envelope, SourceType};
use crate::message::Message;
use crate::types::ActionType;

/// Execution state of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    Pending,
    Executed,
    Failed,
    Simulated,
}

impl EffectStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Simulated => "simulated",
        }
    }
}

impl fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EffectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown effect status: {other}")),
        }
    }
}

/// Deterministic key identifying one externally visible effect: the SHA-256
/// of `decision_id`, `proposal_id`, and the action type. Enforced unique in
/// the store so redelivery cannot double-execute.
#[must_use]
pub fn idempotent_key(decision_id: Uuid, proposal_id: Uuid, action_type: ActionType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(decision_id.as_bytes());
    hasher.update(proposal_id.as_bytes());
    hasher.update(action_type.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// The outcome of executing an approved decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Effect {
    pub envelope: Envelope,

    pub effect_id: Uuid,
    pub decision_id: Uuid,
    pub proposal_id: Uuid,
    pub track_id: String,
    pub action_type: ActionType,
    pub status: EffectStatus,

    /// Free-form execution result or failure description.
    pub result: Option<String>,

    pub idempotent_key: String,
    pub executed_at: DateTime<Utc>,
}

impl Effect {
    /// Build an effect record for a decision; derives the idempotent key.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Envelope,
        source: impl Into<String>,
        decision_id: Uuid,
        proposal_id: Uuid,
        track_id: impl Into<String>,
        action_type: ActionType,
        status: EffectStatus,
        result: Option<String>,
    ) -> Self {
        Self {
            envelope: Envelope::child_of(parent, source, SourceType::Effector),
            effect_id: Uuid::new_v4(),
            decision_id,
            proposal_id,
            track_id: track_id.into(),
            action_type,
            status,
            result,
            idempotent_key: idempotent_key(decision_id, proposal_id, action_type),
            executed_at: Utc::now(),
        }
    }
}

impl Message for Effect {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        format!("effect.{}.{}", self.status, self.action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_key_is_deterministic() {
        let d = Uuid::new_v4();
        let p = Uuid::new_v4();
        let k1 = idempotent_key(d, p, ActionType::Engage);
        let k2 = idempotent_key(d, p, ActionType::Engage);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn idempotent_key_varies_with_inputs() {
        let d = Uuid::new_v4();
        let p = Uuid::new_v4();
        let base = idempotent_key(d, p, ActionType::Engage);
        assert_ne!(base, idempotent_key(d, p, ActionType::Intercept));
        assert_ne!(base, idempotent_key(Uuid::new_v4(), p, ActionType::Engage));
        assert_ne!(base, idempotent_key(d, Uuid::new_v4(), ActionType::Engage));
    }

    #[test]
    fn subject_reflects_status() {
        let root = Envelope::root("authorizer-1", SourceType::Authorizer);
        let effect = Effect::new(
            &root,
            "effector-1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "H-TRK-0001",
            ActionType::Engage,
            EffectStatus::Executed,
            Some("engagement complete".into()),
        );
        assert_eq!(effect.subject(), "effect.executed.engage");
        assert_eq!(
            effect.idempotent_key,
            idempotent_key(effect.decision_id, effect.proposal_id, ActionType::Engage)
        );
    }
}
