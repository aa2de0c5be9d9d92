use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sentinel_core::{ActionType, Classification, EffectStatus, Position, ThreatLevel, TrackType, Velocity};

/// Lifecycle state of a proposal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ProposalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    /// Whether the status is terminal (immutable once reached).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown proposal status: {other}")),
        }
    }
}

/// One row in `tracks`: the current fused picture of a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Track identifier as reported by the sensor layer.
    pub track_id: String,
    /// Cross-system identifier, when known.
    pub external_id: Option<String>,
    pub classification: Classification,
    pub track_type: TrackType,
    pub confidence: f64,
    pub position: Position,
    pub velocity: Velocity,
    pub threat_level: Option<ThreatLevel>,
    /// Track lifecycle state (`active`, `lost`, ...).
    pub state: String,
    pub detection_count: i64,
    pub first_seen: DateTime<Utc>,
    /// Bumped on every update so "active in the last N seconds" queries
    /// avoid scanning history.
    pub last_updated: DateTime<Utc>,
}

/// One row in `detections`: an immutable sensor emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub detection_id: Uuid,
    pub track_id: String,
    pub sensor_id: String,
    pub position: Position,
    pub raw_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One row in `proposals`. At most one pending row per `track_id` at any
/// instant, enforced by a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub proposal_id: Uuid,
    pub track_id: String,
    pub action_type: ActionType,
    pub priority: u8,
    pub threat_level: ThreatLevel,
    pub rationale: String,
    pub constraints: Vec<String>,
    /// Snapshot of the track at proposal time.
    pub track_data: serde_json::Value,
    /// Policy pre-check verdict, when one was obtained.
    pub policy_decision: Option<serde_json::Value>,
    pub status: ProposalStatus,
    pub expires_at: DateTime<Utc>,
    /// Distinct sensor hits merged into this pending proposal.
    pub hit_count: i32,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One row in `decisions`: the human adjudication of a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: Uuid,
    pub proposal_id: Uuid,
    pub approved: bool,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub reason: String,
    pub conditions: Vec<String>,
    pub action_type: ActionType,
    pub track_id: String,
}

/// One row in `effects`. `idempotent_key` is unique, which is what makes
/// effect execution at-most-once under redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectRecord {
    pub effect_id: Uuid,
    pub decision_id: Uuid,
    pub proposal_id: Uuid,
    pub track_id: String,
    pub action_type: ActionType,
    pub status: EffectStatus,
    pub result: Option<String>,
    pub idempotent_key: String,
    pub executed_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One row in the write-once `audit_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Assigned by the store on insert; zero until then.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Kind of entity acted on (`proposal`, `decision`, `effect`, ...).
    pub entity_type: String,
    pub entity_id: String,
    /// What happened (`created`, `approved`, `expired`, ...).
    pub action: String,
    /// Operator or agent responsible.
    pub actor_id: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub correlation_id: Option<Uuid>,
}

impl AuditRecord {
    /// Build an audit entry stamped now.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            actor_id: actor_id.into(),
            old_value: None,
            new_value: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_new_value(mut self, value: serde_json::Value) -> Self {
        self.new_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_old_value(mut self, value: serde_json::Value) -> Self {
        self.old_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// One row in `intervention_rules`: decides whether a planner action needs a
/// human. Empty match sets match anything; rows are evaluated in ascending
/// `evaluation_order` and the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRule {
    pub rule_id: Uuid,
    pub name: String,
    pub action_types: Vec<ActionType>,
    pub threat_levels: Vec<ThreatLevel>,
    pub classifications: Vec<Classification>,
    pub track_types: Vec<TrackType>,
    pub min_priority: Option<u8>,
    pub max_priority: Option<u8>,
    pub requires_approval: bool,
    pub auto_approve: bool,
    pub enabled: bool,
    pub evaluation_order: i32,
}

impl InterventionRule {
    /// Whether this rule matches the given proposal attributes.
    #[must_use]
    pub fn matches(
        &self,
        action_type: ActionType,
        threat_level: ThreatLevel,
        classification: Classification,
        track_type: TrackType,
        priority: u8,
    ) -> bool {
        let in_set = |set: &[ActionType]| set.is_empty() || set.contains(&action_type);
        let threat_ok =
            self.threat_levels.is_empty() || self.threat_levels.contains(&threat_level);
        let class_ok =
            self.classifications.is_empty() || self.classifications.contains(&classification);
        let type_ok = self.track_types.is_empty() || self.track_types.contains(&track_type);
        let min_ok = self.min_priority.is_none_or(|min| priority >= min);
        let max_ok = self.max_priority.is_none_or(|max| priority <= max);
        in_set(&self.action_types) && threat_ok && class_ok && type_ok && min_ok && max_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> InterventionRule {
        InterventionRule {
            rule_id: Uuid::new_v4(),
            name: "kinetic actions".into(),
            action_types: vec![ActionType::Engage, ActionType::Intercept],
            threat_levels: vec![],
            classifications: vec![],
            track_types: vec![],
            min_priority: None,
            max_priority: None,
            requires_approval: true,
            auto_approve: false,
            enabled: true,
            evaluation_order: 10,
        }
    }

    #[test]
    fn empty_sets_match_anything() {
        let mut r = rule();
        r.action_types.clear();
        assert!(r.matches(
            ActionType::Monitor,
            ThreatLevel::Low,
            Classification::Friendly,
            TrackType::Vessel,
            1,
        ));
    }

    #[test]
    fn action_set_filters() {
        let r = rule();
        assert!(r.matches(
            ActionType::Engage,
            ThreatLevel::Critical,
            Classification::Hostile,
            TrackType::Missile,
            10,
        ));
        assert!(!r.matches(
            ActionType::Monitor,
            ThreatLevel::Low,
            Classification::Friendly,
            TrackType::Vessel,
            2,
        ));
    }

    #[test]
    fn priority_range_bounds_inclusive() {
        let mut r = rule();
        r.action_types.clear();
        r.min_priority = Some(5);
        r.max_priority = Some(7);
        for (priority, expected) in [(4, false), (5, true), (7, true), (8, false)] {
            assert_eq!(
                r.matches(
                    ActionType::Identify,
                    ThreatLevel::Medium,
                    Classification::Unknown,
                    TrackType::Aircraft,
                    priority,
                ),
                expected,
                "priority {priority}"
            );
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ProposalStatus::Pending.is_terminal());
        assert!(ProposalStatus::Approved.is_terminal());
        assert!(ProposalStatus::Denied.is_terminal());
        assert!(ProposalStatus::Expired.is_terminal());
    }
}
