use chrono::{DateTime, Utc};

use sentinel_core::{ActionType, Classification, EffectStatus, ThreatLevel, TrackType};

use crate::records::ProposalStatus;

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 100;

/// Filters for `tracks` listings.
#[derive(Debug, Clone)]
pub struct TrackQuery {
    pub classification: Option<Classification>,
    pub threat_level: Option<ThreatLevel>,
    pub track_type: Option<TrackType>,
    /// Only tracks updated at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TrackQuery {
    fn default() -> Self {
        Self {
            classification: None,
            threat_level: None,
            track_type: None,
            since: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Filters for `proposals` listings.
#[derive(Debug, Clone)]
pub struct ProposalQuery {
    pub status: Option<ProposalStatus>,
    pub track_id: Option<String>,
    pub action_type: Option<ActionType>,
    pub threat_level: Option<ThreatLevel>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ProposalQuery {
    fn default() -> Self {
        Self {
            status: Some(ProposalStatus::Pending),
            track_id: None,
            action_type: None,
            threat_level: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Filters for `decisions` listings.
#[derive(Debug, Clone)]
pub struct DecisionQuery {
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for DecisionQuery {
    fn default() -> Self {
        Self {
            approved: None,
            approved_by: None,
            since: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Filters for `effects` listings.
#[derive(Debug, Clone)]
pub struct EffectQuery {
    pub status: Option<EffectStatus>,
    pub action_type: Option<ActionType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for EffectQuery {
    fn default() -> Self {
        Self {
            status: None,
            action_type: None,
            since: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Filters for `audit_log` listings.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor_id: Option<String>,
    pub entity_id: Option<String>,
    pub limit: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            action: None,
            actor_id: None,
            entity_id: None,
            limit: DEFAULT_LIMIT,
        }
    }
}
