//! Sensor worker: emits synthetic detections on a timer.
//!
//! The configuration is runtime-mutable through [`SensorControl`], which the
//! gateway exposes over HTTP. Every successful emission bumps a persisted
//! counter so throughput stays reportable even with observability pipelines
//! offline.

pub mod config;
pub mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sentinel_broker::{Broker, BrokerError};
use sentinel_core::{Detection, Message, ValidationError};
use sentinel_store::Store;

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::topology;

pub use self::config::{SensorConfig, SensorConfigPatch};
use self::sim::{SimTrack, weighted_choice};

/// Persisted counter key for emitted detections.
pub const EMITTED_COUNTER: &str = "sensor_detections_emitted";

/// Shared handle over the sensor's mutable surface: configuration and the
/// `clear_streams` action. The gateway holds one of these.
pub struct SensorControl {
    config: RwLock<SensorConfig>,
    defaults: SensorConfig,
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
}

impl SensorControl {
    #[must_use]
    pub fn new(config: SensorConfig, broker: Arc<dyn Broker>, store: Arc<dyn Store>) -> Self {
        Self {
            defaults: config.clone(),
            config: RwLock::new(config),
            broker,
            store,
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn current(&self) -> SensorConfig {
        self.config.read().clone()
    }

    /// Atomically apply a partial update. The publish loop observes either
    /// the old or the new configuration, never a mix.
    pub fn patch(&self, patch: &SensorConfigPatch) -> Result<SensorConfig, ValidationError> {
        let mut guard = self.config.write();
        let next = guard.apply(patch)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Restore the boot-time configuration.
    #[must_use]
    pub fn reset(&self) -> SensorConfig {
        let mut guard = self.config.write();
        *guard = self.defaults.clone();
        guard.clone()
    }

    /// Purge all five streams and delete the worker consumers so downstream
    /// workers recreate them from their original configuration.
    pub async fn clear_streams(&self) -> Result<(), BrokerError> {
        topology::clear_streams(self.broker.as_ref()).await?;
        info!("streams purged and worker consumers deleted");
        Ok(())
    }

    /// Total detections ever emitted, from the persisted counter.
    pub async fn emitted_total(&self) -> Result<i64, sentinel_store::StoreError> {
        self.store.get_counter(EMITTED_COUNTER).await
    }
}

/// The sensor worker.
pub struct SensorWorker {
    ctx: WorkerContext,
    control: Arc<SensorControl>,
    sensor_id: String,
    sensor_type: String,
    next_track_index: AtomicU64,
}

impl SensorWorker {
    #[must_use]
    pub fn new(ctx: WorkerContext, config: SensorConfig) -> Self {
        let control = Arc::new(SensorControl::new(
            config,
            Arc::clone(&ctx.broker),
            Arc::clone(&ctx.store),
        ));
        let sensor_id = ctx.agent_id.clone();
        Self {
            ctx,
            control,
            sensor_id,
            sensor_type: "radar".to_string(),
            next_track_index: AtomicU64::new(1),
        }
    }

    /// The control handle the gateway exposes.
    #[must_use]
    pub fn control(&self) -> Arc<SensorControl> {
        Arc::clone(&self.control)
    }

    fn spawn_track(&self, config: &SensorConfig, rng: &mut StdRng) -> Option<SimTrack> {
        let track_type = weighted_choice(&config.type_weights, rng)?;
        // Missiles are almost always hostile, whatever the operator set.
        let weights = if track_type == sentinel_core::TrackType::Missile {
            config::missile_classification_weights()
        } else {
            config.classification_weights.clone()
        };
        let classification = weighted_choice(&weights, rng)?;
        let index = self.next_track_index.fetch_add(1, Ordering::Relaxed);
        Some(SimTrack::spawn(index, track_type, classification, rng))
    }

    fn detection_from(&self, track: &SimTrack, rng: &mut StdRng) -> Detection {
        use rand::Rng;
        let mut detection = Detection::new(
            &self.ctx.agent_id,
            &track.track_id,
            &self.sensor_id,
            &self.sensor_type,
            track.position,
            track.velocity,
            rng.gen_range(0.6..0.99),
            Some(track.track_type),
        );
        detection.raw_data = serde_json::json!({"source": "simulation"});
        detection
            .envelope
            .policy_version
            .clone_from(&self.ctx.policy_version);
        detection
    }

    /// Run the publish loop until `shutdown` fires. One tick publishes one
    /// detection per simulated track.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut rng = StdRng::from_entropy();
        let mut tracks: Vec<SimTrack> = Vec::new();

        info!(sensor_id = %self.sensor_id, "sensor started");

        loop {
            let config = self.control.current();
            let interval = config.emission_interval();

            if !config.paused {
                // Reconcile the simulated fleet with the configured count.
                while tracks.len() < config.track_count {
                    match self.spawn_track(&config, &mut rng) {
                        Some(track) => {
                            debug!(track_id = %track.track_id, track_type = %track.track_type, "track spawned");
                            tracks.push(track);
                        }
                        None => break,
                    }
                }
                tracks.truncate(config.track_count);

                let mut emitted = 0_i64;
                for track in &mut tracks {
                    track.advance(interval, &mut rng);
                    let mut detection = self.detection_from(track, &mut rng);
                    if let Err(e) = detection.sign(&self.ctx.signing_secret) {
                        warn!(error = %e, "detection signing failed");
                        continue;
                    }
                    let payload = match serde_json::to_vec(&detection) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "detection serialization failed");
                            continue;
                        }
                    };
                    match self.ctx.broker.publish(&detection.subject(), payload.into()).await {
                        Ok(()) => {
                            emitted += 1;
                            PipelineMetrics::incr(&self.ctx.metrics.sensor_detections_emitted);
                        }
                        Err(e) => warn!(error = %e, "detection publish failed"),
                    }
                }

                if emitted > 0
                    && let Err(e) = self.ctx.store.increment_counter(EMITTED_COUNTER, emitted).await
                {
                    warn!(error = %e, "emission counter update failed");
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        info!(sensor_id = %self.sensor_id, "sensor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Classification, TrackType};

    // A focused test of the override path without broker/store plumbing.
    #[test]
    fn missile_override_draws_only_hostile_or_unknown() {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(5);
        let weights = config::missile_classification_weights();
        for _ in 0..100 {
            let drawn = weighted_choice(&weights, &mut rng).unwrap();
            assert!(
                matches!(drawn, Classification::Hostile | Classification::Unknown),
                "unexpected {drawn:?}"
            );
        }
    }

    #[test]
    fn track_ids_are_sequential_per_sensor() {
        let a = SimTrack::spawn(
            1,
            TrackType::Aircraft,
            Classification::Friendly,
            &mut StdRng::seed_from_u64(1),
        );
        let b = SimTrack::spawn(
            2,
            TrackType::Aircraft,
            Classification::Friendly,
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(a.track_id, "F-TRK-0001");
        assert_eq!(b.track_id, "F-TRK-0002");
    }
}
