use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{Envelope, SourceType};
use crate::geo::{Position, Velocity};
use crate::message::Message;
use crate::policy::PolicyDecision;
use crate::track::CorrelatedTrack;
use crate::types::{ActionType, Classification, ThreatLevel, TrackType};

/// Routing bucket derived from proposal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    High,
    Medium,
    Normal,
}

impl PriorityBucket {
    /// high ≥ 8, medium 5–7, normal < 5.
    #[must_use]
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            8.. => Self::High,
            5..=7 => Self::Medium,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for PriorityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the track a proposal was raised against, embedded in the
/// proposal so operators can adjudicate without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TrackSummary {
    pub track_id: String,
    pub classification: Classification,
    pub track_type: TrackType,
    pub threat_level: ThreatLevel,
    pub position: Position,
    pub velocity: Velocity,
    pub confidence: f64,
    pub detection_count: u32,
}

impl From<&CorrelatedTrack> for TrackSummary {
    fn from(track: &CorrelatedTrack) -> Self {
        Self {
            track_id: track.track_id.clone(),
            classification: track.classification,
            track_type: track.track_type,
            threat_level: track.threat_level,
            position: track.position,
            velocity: track.velocity,
            confidence: track.confidence,
            detection_count: track.detection_count,
        }
    }
}

/// A planner-produced action proposal awaiting human adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Proposal {
    pub envelope: Envelope,

    pub proposal_id: Uuid,
    pub track_id: String,
    pub action_type: ActionType,

    /// 1–10; drives the routing bucket and the expiration window.
    pub priority: u8,

    pub threat_level: ThreatLevel,
    pub classification: Classification,

    /// Why the planner chose this action.
    pub rationale: String,

    /// Operational constraints attached to the action.
    pub constraints: Vec<String>,

    /// Hard deadline for adjudication; past it the proposal expires.
    pub expires_at: DateTime<Utc>,

    /// The track at proposal time.
    pub track: TrackSummary,

    /// Pre-check verdict from the policy engine. A denial is carried, not
    /// suppressed, so operators see the violation.
    pub policy_decision: Option<PolicyDecision>,

    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Build a proposal from a correlated track.
    #[must_use]
    pub fn new(
        parent: &CorrelatedTrack,
        source: impl Into<String>,
        action_type: ActionType,
        priority: u8,
        rationale: impl Into<String>,
        constraints: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            envelope: Envelope::child_of(&parent.envelope, source, SourceType::Planner),
            proposal_id: Uuid::new_v4(),
            track_id: parent.track_id.clone(),
            action_type,
            priority,
            threat_level: parent.threat_level,
            classification: parent.classification,
            rationale: rationale.into(),
            constraints,
            expires_at,
            track: TrackSummary::from(parent),
            policy_decision: None,
            created_at: Utc::now(),
        }
    }

    /// Routing bucket for the proposal subject.
    #[must_use]
    pub fn bucket(&self) -> PriorityBucket {
        PriorityBucket::from_priority(self.priority)
    }
}

impl Message for Proposal {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        format!("proposal.pending.{}", self.bucket())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(PriorityBucket::from_priority(10), PriorityBucket::High);
        assert_eq!(PriorityBucket::from_priority(8), PriorityBucket::High);
        assert_eq!(PriorityBucket::from_priority(7), PriorityBucket::Medium);
        assert_eq!(PriorityBucket::from_priority(5), PriorityBucket::Medium);
        assert_eq!(PriorityBucket::from_priority(4), PriorityBucket::Normal);
        assert_eq!(PriorityBucket::from_priority(0), PriorityBucket::Normal);
    }

    #[test]
    fn proposal_subject_from_priority() {
        let track = crate::track::CorrelatedTrack {
            envelope: Envelope::root("sensor-1", SourceType::Sensor),
            track_id: "H-TRK-0001".into(),
            classification: Classification::Hostile,
            track_type: TrackType::Missile,
            threat_level: ThreatLevel::Critical,
            position: Position {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 8000.0,
            },
            velocity: Velocity {
                speed_mps: 650.0,
                heading_deg: 270.0,
            },
            confidence: 0.9,
            merged_from: vec!["H-TRK-0001".into()],
            sources: vec!["sensor-1".into()],
            detection_count: 1,
            window_start: Utc::now(),
            window_end: Utc::now(),
        };
        let p = Proposal::new(
            &track,
            "planner-1",
            ActionType::Engage,
            10,
            "hostile missile inbound",
            vec![],
            Utc::now(),
        );
        assert_eq!(p.subject(), "proposal.pending.high");
        assert_eq!(p.envelope.correlation_id, track.envelope.correlation_id);
        assert_eq!(p.track.track_id, "H-TRK-0001");
    }
}
