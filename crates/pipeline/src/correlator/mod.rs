//! Correlator worker: deduplicates and fuses classified tracks inside a
//! sliding window, assigns threat levels, and publishes correlated tracks.

pub mod window;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sentinel_broker::Delivery;
use sentinel_core::{
    Classification, CorrelatedTrack, Envelope, Message, SourceType, ThreatLevel, Track, TrackType,
    Velocity, circular_mean_heading, mean_position,
};
use sentinel_policy::{PolicyClient, PolicyPath};
use sentinel_store::Store;

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::runtime::{MessageHandler, WorkerError, attest, decode, publish_message};

use self::window::SlidingWindow;

/// Default sliding-window TTL.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// How often the background sweeper clears expired window entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Threat assignment over the fused track.
#[must_use]
pub fn threat_level(
    classification: Classification,
    track_type: TrackType,
    speed_mps: f64,
) -> ThreatLevel {
    match classification {
        Classification::Hostile => {
            if track_type == TrackType::Missile {
                ThreatLevel::Critical
            } else if track_type == TrackType::Aircraft && speed_mps > 300.0 {
                ThreatLevel::High
            } else {
                ThreatLevel::Medium
            }
        }
        Classification::Unknown => {
            if speed_mps > 500.0 {
                ThreatLevel::High
            } else if speed_mps > 200.0 {
                ThreatLevel::Medium
            } else {
                ThreatLevel::Low
            }
        }
        Classification::Friendly | Classification::Neutral => ThreatLevel::Low,
    }
}

/// Fuse the current track with its absorbed siblings into one correlated
/// track. Aggregation is commutative on the merged-id set, so arrival order
/// inside the window does not change which tracks fused.
#[must_use]
pub fn fuse(current: &Track, absorbed: &[Track], source: &str) -> CorrelatedTrack {
    let members: Vec<&Track> = std::iter::once(current).chain(absorbed.iter()).collect();

    let positions: Vec<_> = members.iter().map(|t| t.position).collect();
    let position = mean_position(&positions).unwrap_or(current.position);

    #[allow(clippy::cast_precision_loss)]
    let speed = members.iter().map(|t| t.velocity.speed_mps).sum::<f64>() / members.len() as f64;
    let headings: Vec<_> = members.iter().map(|t| t.velocity.heading_deg).collect();
    let heading = circular_mean_heading(&headings).unwrap_or(current.velocity.heading_deg);

    let mut merged_from = vec![current.track_id.clone()];
    for track in absorbed {
        if !merged_from.contains(&track.track_id) {
            merged_from.push(track.track_id.clone());
        }
    }

    let mut sources = Vec::new();
    for track in &members {
        if !sources.contains(&track.sensor_id) {
            sources.push(track.sensor_id.clone());
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let detection_count = members.len() as u32;
    #[allow(clippy::cast_precision_loss)]
    let confidence = (current.confidence + 0.05 * absorbed.len() as f64).min(1.0);

    let window_start = members
        .iter()
        .map(|t| t.envelope.timestamp)
        .min()
        .unwrap_or(current.envelope.timestamp);
    let window_end = members
        .iter()
        .map(|t| t.envelope.timestamp)
        .max()
        .unwrap_or(current.envelope.timestamp);

    let level = threat_level(current.classification, current.track_type, speed);

    CorrelatedTrack {
        envelope: Envelope::child_of(&current.envelope, source, SourceType::Correlator),
        track_id: current.track_id.clone(),
        classification: current.classification,
        track_type: current.track_type,
        threat_level: level,
        position,
        velocity: Velocity {
            speed_mps: speed,
            heading_deg: heading,
        },
        confidence,
        merged_from,
        sources,
        detection_count,
        window_start,
        window_end,
    }
}

/// The correlator worker.
pub struct Correlator {
    ctx: WorkerContext,
    window: Arc<SlidingWindow>,
}

impl Correlator {
    #[must_use]
    pub fn new(ctx: WorkerContext) -> Self {
        Self::with_window(ctx, DEFAULT_WINDOW)
    }

    #[must_use]
    pub fn with_window(ctx: WorkerContext, ttl: Duration) -> Self {
        Self {
            ctx,
            window: Arc::new(SlidingWindow::new(ttl)),
        }
    }

    /// Spawn the background sweeper. Runs until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let window = Arc::clone(&self.window);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = window.sweep();
                        if removed > 0 {
                            debug!(removed, "window sweep");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl MessageHandler for Correlator {
    fn name(&self) -> &'static str {
        "correlator"
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let track: Track = decode(&delivery.payload)?;
        attest(&track, &self.ctx.signing_secret)?;

        let absorbed = self.window.absorb(&track);
        #[allow(clippy::cast_possible_truncation)]
        if !absorbed.is_empty() {
            self.ctx
                .metrics
                .correlator_tracks_merged
                .fetch_add(absorbed.len() as u64, std::sync::atomic::Ordering::Relaxed);
        }

        let mut correlated = fuse(&track, &absorbed, &self.ctx.agent_id);
        correlated
            .sign(&self.ctx.signing_secret)
            .map_err(|e| WorkerError::Transient(e.to_string()))?;

        // Fold the threat picture back into the track row.
        if let Some(mut row) = self.ctx.store.get_track(&track.track_id).await? {
            row.threat_level = Some(correlated.threat_level);
            row.position = correlated.position;
            row.velocity = correlated.velocity;
            row.confidence = correlated.confidence;
            row.last_updated = Utc::now();
            self.ctx.store.upsert_track(&row).await?;
        }

        match self
            .ctx
            .policy
            .check(
                PolicyPath::DataHandling,
                &serde_json::to_value(&correlated).map_err(WorkerError::from)?,
            )
            .await
        {
            Ok(verdict) if !verdict.allowed => {
                warn!(
                    track_id = %correlated.track_id,
                    violations = ?verdict.violations,
                    "data handling denied, withholding correlated track"
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "data handling check unavailable, proceeding");
            }
        }

        publish_message(self.ctx.broker.as_ref(), &correlated).await?;
        PipelineMetrics::incr(&self.ctx.metrics.correlator_tracks_correlated);
        debug!(
            track_id = %correlated.track_id,
            threat = %correlated.threat_level,
            merged = correlated.merged_from.len(),
            "track correlated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::Position;
    use uuid::Uuid;

    fn track(id: &str, classification: Classification, track_type: TrackType, speed: f64) -> Track {
        Track::classified(
            &Envelope::root("sensor-1", SourceType::Sensor),
            "classifier-1",
            id,
            classification,
            track_type,
            Position {
                latitude: 35.0,
                longitude: 139.0,
                altitude: 8_000.0,
            },
            Velocity {
                speed_mps: speed,
                heading_deg: 90.0,
            },
            0.8,
            "sensor-1",
            Uuid::new_v4(),
        )
    }

    #[test]
    fn threat_table_cell_by_cell() {
        use Classification::{Friendly, Hostile, Neutral, Unknown};
        use ThreatLevel as T;
        use TrackType::{Aircraft, Ground, Missile, Vessel};

        assert_eq!(threat_level(Hostile, Missile, 650.0), T::Critical);
        assert_eq!(threat_level(Hostile, Aircraft, 350.0), T::High);
        assert_eq!(threat_level(Hostile, Aircraft, 250.0), T::Medium);
        assert_eq!(threat_level(Hostile, Vessel, 20.0), T::Medium);
        assert_eq!(threat_level(Hostile, Ground, 10.0), T::Medium);
        assert_eq!(threat_level(Unknown, Aircraft, 600.0), T::High);
        assert_eq!(threat_level(Unknown, Aircraft, 300.0), T::Medium);
        assert_eq!(threat_level(Unknown, Vessel, 10.0), T::Low);
        assert_eq!(threat_level(Friendly, Aircraft, 400.0), T::Low);
        assert_eq!(threat_level(Neutral, Vessel, 10.0), T::Low);
    }

    #[test]
    fn fuse_single_track() {
        let t = track("H-1", Classification::Hostile, TrackType::Missile, 650.0);
        let c = fuse(&t, &[], "correlator-1");
        assert_eq!(c.merged_from, vec!["H-1".to_string()]);
        assert_eq!(c.detection_count, 1);
        assert_eq!(c.threat_level, ThreatLevel::Critical);
        assert!((c.confidence - 0.8).abs() < 1e-9);
        assert_eq!(c.envelope.correlation_id, t.envelope.correlation_id);
    }

    #[test]
    fn fuse_aggregates_members() {
        let a = track("H-1", Classification::Hostile, TrackType::Aircraft, 300.0);
        let mut b = track("H-2", Classification::Hostile, TrackType::Aircraft, 340.0);
        b.position.latitude = 35.004;
        b.velocity.heading_deg = 110.0;
        b.sensor_id = "sensor-2".into();

        let c = fuse(&a, &[b], "correlator-1");
        assert_eq!(c.merged_from, vec!["H-1".to_string(), "H-2".to_string()]);
        assert_eq!(c.detection_count, 2);
        assert!((c.velocity.speed_mps - 320.0).abs() < 1e-9);
        assert!((c.position.latitude - 35.002).abs() < 1e-9);
        assert!((c.velocity.heading_deg - 100.0).abs() < 0.5);
        assert_eq!(c.sources, vec!["sensor-1".to_string(), "sensor-2".to_string()]);
        assert!((c.confidence - 0.85).abs() < 1e-9);
        // 320 mean speed over 300: hostile aircraft at speed is high threat.
        assert_eq!(c.threat_level, ThreatLevel::High);
    }

    #[test]
    fn fuse_confidence_clamps() {
        let t = track("H-1", Classification::Hostile, TrackType::Aircraft, 300.0);
        let siblings: Vec<Track> = (0..10)
            .map(|i| {
                track(
                    &format!("H-{i}"),
                    Classification::Hostile,
                    TrackType::Aircraft,
                    300.0,
                )
            })
            .collect();
        let c = fuse(&t, &siblings, "correlator-1");
        assert!((c.confidence - 1.0).abs() < 1e-9);
    }
}
