use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{Envelope, SourceType};
use crate::error::ValidationError;
use crate::geo::{Position, Velocity};
use crate::message::Message;
use crate::types::TrackType;

/// A raw sensor return. The originating message of every pipeline chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Detection {
    pub envelope: Envelope,

    /// Unique identifier of this emission.
    pub detection_id: Uuid,

    /// Identifier of the observed track. Simulated ids carry a
    /// classification prefix (`F-`, `H-`, `N-`, `U-`).
    pub track_id: String,

    /// Emitting sensor.
    pub sensor_id: String,

    /// Sensor modality (e.g. `radar`).
    pub sensor_type: String,

    pub position: Position,
    pub velocity: Velocity,

    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,

    /// Platform-type hint supplied by the sensor. Authoritative for the
    /// classifier when present.
    pub track_type: Option<TrackType>,

    /// Sensor-specific extras, passed through untouched.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub raw_data: serde_json::Value,

    pub detected_at: DateTime<Utc>,
}

impl Detection {
    /// Create a detection with a fresh root envelope.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: impl Into<String>,
        track_id: impl Into<String>,
        sensor_id: impl Into<String>,
        sensor_type: impl Into<String>,
        position: Position,
        velocity: Velocity,
        confidence: f64,
        track_type: Option<TrackType>,
    ) -> Self {
        let source = source.into();
        Self {
            envelope: Envelope::root(source, SourceType::Sensor),
            detection_id: Uuid::new_v4(),
            track_id: track_id.into(),
            sensor_id: sensor_id.into(),
            sensor_type: sensor_type.into(),
            position,
            velocity,
            confidence,
            track_type,
            raw_data: serde_json::Value::Null,
            detected_at: Utc::now(),
        }
    }

    /// Enforce the detection invariants: non-empty track id, confidence in
    /// `[0, 1]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.track_id.is_empty() {
            return Err(ValidationError::new("detection.track_id", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::new(
                "detection.confidence",
                format!("must be within [0, 1], got {}", self.confidence),
            ));
        }
        Ok(())
    }
}

impl Message for Detection {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn subject(&self) -> String {
        format!("detect.{}.{}", self.sensor_id, self.sensor_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> Detection {
        Detection::new(
            "sensor-1",
            "H-TRK-0001",
            "sensor-1",
            "radar",
            Position {
                latitude: 35.0,
                longitude: 139.0,
                altitude: 8000.0,
            },
            Velocity {
                speed_mps: 650.0,
                heading_deg: 270.0,
            },
            0.9,
            Some(TrackType::Missile),
        )
    }

    #[test]
    fn subject_includes_sensor_and_type() {
        assert_eq!(detection().subject(), "detect.sensor-1.radar");
    }

    #[test]
    fn validation_rejects_empty_track_id() {
        let mut d = detection();
        d.track_id = String::new();
        assert!(d.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_confidence() {
        let mut d = detection();
        d.confidence = 1.2;
        assert!(d.validate().is_err());
        d.confidence = -0.1;
        assert!(d.validate().is_err());
        d.confidence = 1.0;
        assert!(d.validate().is_ok());
    }

    #[test]
    fn serde_round_trip() {
        let d = detection();
        let json = serde_json::to_string(&d).unwrap();
        let back: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(back.detection_id, d.detection_id);
        assert_eq!(back.track_id, d.track_id);
        assert_eq!(back.track_type, Some(TrackType::Missile));
    }

    #[test]
    fn sign_then_verify() {
        let mut d = detection();
        d.sign(b"secret").unwrap();
        assert!(!d.envelope.signature.is_empty());
        assert!(d.verify(b"secret").unwrap());
        assert!(!d.verify(b"wrong").unwrap());
    }
}
