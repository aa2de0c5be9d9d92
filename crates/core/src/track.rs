use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{Envelope, SourceType};
use crate::geo::{Position, Velocity};
use crate::message::Message;
use crate::types::{Classification, ThreatLevel, TrackType};

/// A classified track: one per detection, produced by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Track {
    pub envelope: Envelope,

    pub track_id: String,
    pub classification: Classification,
    pub track_type: TrackType,
    pub position: Position,
    pub velocity: Velocity,

    /// Classifier-adjusted confidence in `[0, 1]`.
    pub confidence: f64,

    /// Sensor that produced the underlying detection.
    pub sensor_id: String,

    /// The underlying detection.
    pub detection_id: Uuid,

    pub classified_at: DateTime<Utc>,
}

impl Track {
    /// Build a classified track from a detection's envelope.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn classified(
        parent: &Envelope,
        source: impl Into<String>,
        track_id: impl Into<String>,
        classification: Classification,
        track_type: TrackType,
        position: Position,
        velocity: Velocity,
        confidence: f64,
        sensor_id: impl Into<String>,
        detection_id: Uuid,
    ) -> Self {
        Self {
            envelope: Envelope::child_of(parent, source, SourceType::Classifier),
            track_id: track_id.into(),
            classification,
            track_type,
            position,
            velocity,
            confidence,
            sensor_id: sensor_id.into(),
            detection_id,
            classified_at: Utc::now(),
        }
    }
}

impl Message for Track {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        format!("track.classified.{}", self.classification)
    }
}

/// A correlated track: the correlator's fusion of one or more classified
/// tracks observed inside its sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CorrelatedTrack {
    pub envelope: Envelope,

    pub track_id: String,
    pub classification: Classification,
    pub track_type: TrackType,
    pub threat_level: ThreatLevel,

    /// Mean position of the merged components.
    pub position: Position,

    /// Mean speed; heading is the circular mean of component headings.
    pub velocity: Velocity,

    pub confidence: f64,

    /// Current track id followed by merged sibling ids.
    pub merged_from: Vec<String>,

    /// Distinct sensors that contributed.
    pub sources: Vec<String>,

    /// Total detections folded into this track.
    pub detection_count: u32,

    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl Message for CorrelatedTrack {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        format!("track.correlated.{}", self.threat_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_subject_uses_classification() {
        let root = Envelope::root("sensor-1", SourceType::Sensor);
        let track = Track::classified(
            &root,
            "classifier-1",
            "H-TRK-0001",
            Classification::Hostile,
            TrackType::Aircraft,
            Position {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 9000.0,
            },
            Velocity {
                speed_mps: 250.0,
                heading_deg: 90.0,
            },
            0.8,
            "sensor-1",
            Uuid::new_v4(),
        );
        assert_eq!(track.subject(), "track.classified.hostile");
        assert_eq!(track.envelope.correlation_id, root.message_id);
    }

    #[test]
    fn correlated_subject_uses_threat_level() {
        let root = Envelope::root("sensor-1", SourceType::Sensor);
        let correlated = CorrelatedTrack {
            envelope: Envelope::child_of(&root, "correlator-1", SourceType::Correlator),
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
        assert_eq!(correlated.subject(), "track.correlated.critical");
    }
}
