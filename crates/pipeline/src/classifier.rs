//! Classifier worker: turns raw detections into classified tracks.
//!
//! Classification is deterministic: simulated track-id prefixes are
//! authoritative, then the sensor's type hint, then kinematic inference.
//! The rules are demonstrably synthetic; they exist to exercise the
//! pipeline, not to classify real sensor returns.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use sentinel_broker::Delivery;
use sentinel_core::{
    Classification, Detection, Message, Position, Track, TrackType, Velocity,
};
use sentinel_policy::{PolicyClient, PolicyPath};
use sentinel_store::{DetectionRecord, Store, TrackRecord};

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::runtime::{MessageHandler, WorkerError, attest, decode, publish_message};

/// Longitudes east of this meridian count as open water for the land/sea
/// heuristic. Synthetic, like the rest of the classifier.
const SEA_MERIDIAN_DEG: f64 = 125.0;

/// Derive the classification for a detection. Track-id prefixes override
/// everything else; unprefixed tracks are unknown until proven otherwise.
#[must_use]
pub fn classify(detection: &Detection) -> Classification {
    Classification::from_track_id_prefix(&detection.track_id).unwrap_or(Classification::Unknown)
}

/// Infer the platform type from kinematics when the sensor supplied no
/// hint. Rules apply in order.
#[must_use]
pub fn infer_track_type(position: &Position, velocity: &Velocity) -> TrackType {
    let altitude = position.altitude;
    let speed = velocity.speed_mps;

    if altitude > 10_000.0 && speed > 200.0 {
        TrackType::Aircraft
    } else if altitude > 1_000.0 && speed > 500.0 {
        TrackType::Missile
    } else if altitude < 1_000.0 && speed < 50.0 && speed >= 1.0 {
        if position.longitude > SEA_MERIDIAN_DEG {
            TrackType::Vessel
        } else {
            TrackType::Ground
        }
    } else if speed < 1.0 {
        TrackType::Ground
    } else {
        TrackType::Unknown
    }
}

/// Confidence adjustment per classification: friendly ×1.1 (clamped),
/// hostile ×0.95, unknown ×0.8, neutral unchanged.
#[must_use]
pub fn adjust_confidence(confidence: f64, classification: Classification) -> f64 {
    let adjusted = match classification {
        Classification::Friendly => confidence * 1.1,
        Classification::Hostile => confidence * 0.95,
        Classification::Unknown => confidence * 0.8,
        Classification::Neutral => confidence,
    };
    adjusted.min(1.0)
}

/// The classifier worker.
pub struct Classifier {
    ctx: WorkerContext,
}

impl Classifier {
    #[must_use]
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn persist(&self, detection: &Detection, track: &Track) -> Result<(), WorkerError> {
        self.ctx
            .store
            .insert_detection(&DetectionRecord {
                detection_id: detection.detection_id,
                track_id: detection.track_id.clone(),
                sensor_id: detection.sensor_id.clone(),
                position: detection.position,
                raw_data: detection.raw_data.clone(),
                created_at: detection.detected_at,
            })
            .await?;

        let existing = self.ctx.store.get_track(&track.track_id).await?;
        let (first_seen, detection_count) = existing
            .map_or((track.classified_at, 1), |t| {
                (t.first_seen, t.detection_count + 1)
            });
        self.ctx
            .store
            .upsert_track(&TrackRecord {
                track_id: track.track_id.clone(),
                external_id: None,
                classification: track.classification,
                track_type: track.track_type,
                confidence: track.confidence,
                position: track.position,
                velocity: track.velocity,
                threat_level: None,
                state: "active".into(),
                detection_count,
                first_seen,
                last_updated: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Classifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let detection: Detection = decode(&delivery.payload)?;
        attest(&detection, &self.ctx.signing_secret)?;
        detection
            .validate()
            .map_err(|e| WorkerError::Malformed(e.to_string()))?;

        let classification = classify(&detection);
        // The sensor's type hint is authoritative when present.
        let track_type = detection
            .track_type
            .unwrap_or_else(|| infer_track_type(&detection.position, &detection.velocity));
        let confidence = adjust_confidence(detection.confidence, classification);

        let mut track = Track::classified(
            &detection.envelope,
            &self.ctx.agent_id,
            &detection.track_id,
            classification,
            track_type,
            detection.position,
            detection.velocity,
            confidence,
            &detection.sensor_id,
            detection.detection_id,
        );
        track
            .sign(&self.ctx.signing_secret)
            .map_err(|e| WorkerError::Transient(e.to_string()))?;

        self.persist(&detection, &track).await?;

        // Clearance check on the enriched record. Unreachable engine is a
        // warning: this output still passes correlation and the human gate.
        match self
            .ctx
            .policy
            .check(
                PolicyPath::DataHandling,
                &serde_json::to_value(&track).map_err(WorkerError::from)?,
            )
            .await
        {
            Ok(verdict) if !verdict.allowed => {
                warn!(
                    track_id = %track.track_id,
                    violations = ?verdict.violations,
                    "data handling denied, withholding classified track"
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "data handling check unavailable, proceeding");
            }
        }

        publish_message(self.ctx.broker.as_ref(), &track).await?;
        PipelineMetrics::incr(&self.ctx.metrics.classifier_tracks_classified);
        debug!(
            track_id = %track.track_id,
            classification = %track.classification,
            track_type = %track.track_type,
            "track classified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(track_id: &str, alt: f64, speed: f64, lon: f64) -> Detection {
        Detection::new(
            "sensor-1",
            track_id,
            "sensor-1",
            "radar",
            Position {
                latitude: 30.0,
                longitude: lon,
                altitude: alt,
            },
            Velocity {
                speed_mps: speed,
                heading_deg: 90.0,
            },
            0.8,
            None,
        )
    }

    #[test]
    fn prefix_overrides_everything() {
        assert_eq!(
            classify(&detection("F-TRK-0001", 0.0, 0.0, 0.0)),
            Classification::Friendly
        );
        assert_eq!(
            classify(&detection("H-TRK-0001", 0.0, 0.0, 0.0)),
            Classification::Hostile
        );
        assert_eq!(
            classify(&detection("N-TRK-0001", 0.0, 0.0, 0.0)),
            Classification::Neutral
        );
        assert_eq!(
            classify(&detection("U-TRK-0001", 0.0, 0.0, 0.0)),
            Classification::Unknown
        );
        assert_eq!(
            classify(&detection("TRK-0001", 0.0, 0.0, 0.0)),
            Classification::Unknown
        );
    }

    #[test]
    fn kinematic_inference_table() {
        let p = |alt: f64, lon: f64| Position {
            latitude: 30.0,
            longitude: lon,
            altitude: alt,
        };
        let v = |speed: f64| Velocity {
            speed_mps: speed,
            heading_deg: 0.0,
        };

        // High and fast: aircraft.
        assert_eq!(infer_track_type(&p(12_000.0, 100.0), &v(250.0)), TrackType::Aircraft);
        // Above 1 km and very fast: missile.
        assert_eq!(infer_track_type(&p(8_000.0, 100.0), &v(650.0)), TrackType::Missile);
        // Low and slow over water: vessel.
        assert_eq!(infer_track_type(&p(0.0, 140.0), &v(10.0)), TrackType::Vessel);
        // Low and slow over land: ground.
        assert_eq!(infer_track_type(&p(50.0, 100.0), &v(10.0)), TrackType::Ground);
        // Near-zero speed: ground.
        assert_eq!(infer_track_type(&p(5_000.0, 100.0), &v(0.2)), TrackType::Ground);
        // Everything else: unknown.
        assert_eq!(infer_track_type(&p(5_000.0, 100.0), &v(150.0)), TrackType::Unknown);
    }

    #[test]
    fn confidence_adjustments() {
        assert!((adjust_confidence(0.8, Classification::Friendly) - 0.88).abs() < 1e-9);
        assert!((adjust_confidence(0.95, Classification::Friendly) - 1.0).abs() < 1e-9);
        assert!((adjust_confidence(0.8, Classification::Hostile) - 0.76).abs() < 1e-9);
        assert!((adjust_confidence(0.8, Classification::Unknown) - 0.64).abs() < 1e-9);
        assert!((adjust_confidence(0.8, Classification::Neutral) - 0.8).abs() < 1e-9);
    }
}
