use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{Envelope, SourceType};
use crate::message::Message;
use crate::types::ActionType;

/// A human adjudication of a proposal. Created exactly once per proposal
/// terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Decision {
    pub envelope: Envelope,

    pub decision_id: Uuid,
    pub proposal_id: Uuid,
    pub track_id: String,
    pub action_type: ActionType,

    pub approved: bool,

    /// Operator identifier. Never empty and never the literal `system`:
    /// this pipeline has no machine-approval path.
    pub approved_by: String,

    pub reason: String,

    /// Operator-attached conditions on the approval.
    #[serde(default)]
    pub conditions: Vec<String>,

    pub decided_at: DateTime<Utc>,
}

impl Decision {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Envelope,
        source: impl Into<String>,
        proposal_id: Uuid,
        track_id: impl Into<String>,
        action_type: ActionType,
        approved: bool,
        approved_by: impl Into<String>,
        reason: impl Into<String>,
        conditions: Vec<String>,
    ) -> Self {
        Self {
            envelope: Envelope::child_of(parent, source, SourceType::Authorizer),
            decision_id: Uuid::new_v4(),
            proposal_id,
            track_id: track_id.into(),
            action_type,
            approved,
            approved_by: approved_by.into(),
            reason: reason.into(),
            conditions,
            decided_at: Utc::now(),
        }
    }
}

impl Message for Decision {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        let verdict = if self.approved { "approved" } else { "denied" };
        format!("decision.{verdict}.{}", self.action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_reflects_verdict_and_action() {
        let root = Envelope::root("planner-1", SourceType::Planner);
        let approved = Decision::new(
            &root,
            "authorizer-1",
            Uuid::new_v4(),
            "H-TRK-0001",
            ActionType::Engage,
            true,
            "op-001",
            "confirmed hostile",
            vec![],
        );
        assert_eq!(approved.subject(), "decision.approved.engage");

        let denied = Decision::new(
            &root,
            "authorizer-1",
            Uuid::new_v4(),
            "H-TRK-0002",
            ActionType::Intercept,
            false,
            "op-002",
            "insufficient confidence",
            vec![],
        );
        assert_eq!(denied.subject(), "decision.denied.intercept");
    }
}
