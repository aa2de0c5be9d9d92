use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a track relative to own forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Friendly,
    Hostile,
    Neutral,
    Unknown,
}

impl Classification {
    /// All classifications in a stable order, used for weighted draws.
    pub const ALL: [Self; 4] = [Self::Friendly, Self::Hostile, Self::Neutral, Self::Unknown];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Hostile => "hostile",
            Self::Neutral => "neutral",
            Self::Unknown => "unknown",
        }
    }

    /// Derive the classification from a simulated track-id prefix
    /// (`F-` friendly, `H-` hostile, `N-` neutral, `U-` unknown).
    #[must_use]
    pub fn from_track_id_prefix(track_id: &str) -> Option<Self> {
        match track_id.get(..2) {
            Some("F-") => Some(Self::Friendly),
            Some("H-") => Some(Self::Hostile),
            Some("N-") => Some(Self::Neutral),
            Some("U-") => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friendly" => Ok(Self::Friendly),
            "hostile" => Ok(Self::Hostile),
            "neutral" => Ok(Self::Neutral),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Kind of platform a track represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Aircraft,
    Vessel,
    Ground,
    Missile,
    Unknown,
}

impl TrackType {
    /// All track types in a stable order, used for weighted draws.
    pub const ALL: [Self; 5] = [
        Self::Aircraft,
        Self::Vessel,
        Self::Ground,
        Self::Missile,
        Self::Unknown,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aircraft => "aircraft",
            Self::Vessel => "vessel",
            Self::Ground => "ground",
            Self::Missile => "missile",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aircraft" => Ok(Self::Aircraft),
            "vessel" => Ok(Self::Vessel),
            "ground" => Ok(Self::Ground),
            "missile" => Ok(Self::Missile),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown track type: {other}")),
        }
    }
}

/// Assessed threat level of a correlated track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl ThreatLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown threat level: {other}")),
        }
    }
}

/// Action the planner can propose against a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Engage,
    Intercept,
    Identify,
    Track,
    Monitor,
    Ignore,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Engage => "engage",
            Self::Intercept => "intercept",
            Self::Identify => "identify",
            Self::Track => "track",
            Self::Monitor => "monitor",
            Self::Ignore => "ignore",
        }
    }

    /// Whether the action is passive (observation only, no kinetic or
    /// electronic commitment). Passive actions never require approval.
    #[must_use]
    pub fn is_passive(self) -> bool {
        matches!(self, Self::Track | Self::Monitor | Self::Ignore)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "engage" => Ok(Self::Engage),
            "intercept" => Ok(Self::Intercept),
            "identify" => Ok(Self::Identify),
            "track" => Ok(Self::Track),
            "monitor" => Ok(Self::Monitor),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_from_prefix() {
        assert_eq!(
            Classification::from_track_id_prefix("F-TRK-0042"),
            Some(Classification::Friendly)
        );
        assert_eq!(
            Classification::from_track_id_prefix("H-TRK-0001"),
            Some(Classification::Hostile)
        );
        assert_eq!(
            Classification::from_track_id_prefix("N-1"),
            Some(Classification::Neutral)
        );
        assert_eq!(
            Classification::from_track_id_prefix("U-1"),
            Some(Classification::Unknown)
        );
        assert_eq!(Classification::from_track_id_prefix("X-1"), None);
        assert_eq!(Classification::from_track_id_prefix(""), None);
    }

    #[test]
    fn snake_case_wire_names() {
        assert_eq!(
            serde_json::to_string(&ThreatLevel::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&ActionType::Engage).unwrap(),
            "\"engage\""
        );
        let back: TrackType = serde_json::from_str("\"missile\"").unwrap();
        assert_eq!(back, TrackType::Missile);
    }

    #[test]
    fn passive_actions() {
        assert!(ActionType::Monitor.is_passive());
        assert!(ActionType::Track.is_passive());
        assert!(ActionType::Ignore.is_passive());
        assert!(!ActionType::Engage.is_passive());
        assert!(!ActionType::Intercept.is_passive());
        assert!(!ActionType::Identify.is_passive());
    }

    #[test]
    fn round_trip_from_str() {
        for action in [
            ActionType::Engage,
            ActionType::Intercept,
            ActionType::Identify,
            ActionType::Track,
            ActionType::Monitor,
            ActionType::Ignore,
        ] {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
    }
}
