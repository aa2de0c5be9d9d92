//! Per-process pipeline counters.
//!
//! All counters use relaxed ordering; for a consistent point-in-time view
//! call [`snapshot`](PipelineMetrics::snapshot). The Prometheus names are a
//! fixed contract with the monitoring surface.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters tracking pipeline outcomes in this process.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Detections emitted by the sensor.
    pub sensor_detections_emitted: AtomicU64,
    /// Tracks classified.
    pub classifier_tracks_classified: AtomicU64,
    /// Correlated tracks published.
    pub correlator_tracks_correlated: AtomicU64,
    /// Window entries absorbed into a merge.
    pub correlator_tracks_merged: AtomicU64,
    /// Proposals published to the approval queue.
    pub planner_proposals_published: AtomicU64,
    /// Correlated tracks that resolved to a passive action (no proposal).
    pub planner_proposals_suppressed: AtomicU64,
    /// Broker handles currently retained awaiting a human (gauge).
    pub authorizer_proposals_pending: AtomicI64,
    /// Sensor hits merged into an existing pending proposal.
    pub authorizer_proposals_merged: AtomicU64,
    /// Proposals expired by the sweeper.
    pub authorizer_proposals_expired: AtomicU64,
    /// Human decisions recorded.
    pub authorizer_decisions_recorded: AtomicU64,
    /// Effects executed (or simulated).
    pub effector_effects_executed: AtomicU64,
    /// Effects that failed policy or execution.
    pub effector_effects_failed: AtomicU64,
    /// Redeliveries skipped because the idempotent key already existed.
    pub effector_effects_idempotent: AtomicU64,
    /// Messages settled successfully across all consume loops.
    pub messages_processed: AtomicU64,
    /// Malformed messages terminated.
    pub messages_terminated: AtomicU64,
    /// Transient failures negatively acknowledged.
    pub messages_retried: AtomicU64,
}

/// Plain-data copy of the counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MetricsSnapshot {
    pub sensor_detections_emitted: u64,
    pub classifier_tracks_classified: u64,
    pub correlator_tracks_correlated: u64,
    pub correlator_tracks_merged: u64,
    pub planner_proposals_published: u64,
    pub planner_proposals_suppressed: u64,
    pub authorizer_proposals_pending: i64,
    pub authorizer_proposals_merged: u64,
    pub authorizer_proposals_expired: u64,
    pub authorizer_decisions_recorded: u64,
    pub effector_effects_executed: u64,
    pub effector_effects_failed: u64,
    pub effector_effects_idempotent: u64,
    pub messages_processed: u64,
    pub messages_terminated: u64,
    pub messages_retried: u64,
}

impl PipelineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sensor_detections_emitted: self.sensor_detections_emitted.load(Ordering::Relaxed),
            classifier_tracks_classified: self.classifier_tracks_classified.load(Ordering::Relaxed),
            correlator_tracks_correlated: self
                .correlator_tracks_correlated
                .load(Ordering::Relaxed),
            correlator_tracks_merged: self.correlator_tracks_merged.load(Ordering::Relaxed),
            planner_proposals_published: self.planner_proposals_published.load(Ordering::Relaxed),
            planner_proposals_suppressed: self.planner_proposals_suppressed.load(Ordering::Relaxed),
            authorizer_proposals_pending: self.authorizer_proposals_pending.load(Ordering::Relaxed),
            authorizer_proposals_merged: self.authorizer_proposals_merged.load(Ordering::Relaxed),
            authorizer_proposals_expired: self.authorizer_proposals_expired.load(Ordering::Relaxed),
            authorizer_decisions_recorded: self
                .authorizer_decisions_recorded
                .load(Ordering::Relaxed),
            effector_effects_executed: self.effector_effects_executed.load(Ordering::Relaxed),
            effector_effects_failed: self.effector_effects_failed.load(Ordering::Relaxed),
            effector_effects_idempotent: self.effector_effects_idempotent.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_terminated: self.messages_terminated.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
        }
    }

    /// Render the counters in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        };
        counter(
            "sensor_detections_emitted_total",
            "Detections emitted by the sensor.",
            snap.sensor_detections_emitted,
        );
        counter(
            "classifier_tracks_classified_total",
            "Tracks classified.",
            snap.classifier_tracks_classified,
        );
        counter(
            "correlator_tracks_correlated_total",
            "Correlated tracks published.",
            snap.correlator_tracks_correlated,
        );
        counter(
            "correlator_tracks_merged_total",
            "Window entries absorbed into a merge.",
            snap.correlator_tracks_merged,
        );
        counter(
            "planner_proposals_published_total",
            "Proposals published to the approval queue.",
            snap.planner_proposals_published,
        );
        counter(
            "planner_proposals_suppressed_total",
            "Correlated tracks resolved without a proposal.",
            snap.planner_proposals_suppressed,
        );
        counter(
            "authorizer_proposals_merged_total",
            "Sensor hits merged into an existing pending proposal.",
            snap.authorizer_proposals_merged,
        );
        counter(
            "authorizer_proposals_expired_total",
            "Proposals expired by the sweeper.",
            snap.authorizer_proposals_expired,
        );
        counter(
            "authorizer_decisions_recorded_total",
            "Human decisions recorded.",
            snap.authorizer_decisions_recorded,
        );
        counter(
            "effector_effects_executed_total",
            "Effects executed or simulated.",
            snap.effector_effects_executed,
        );
        counter(
            "effector_effects_failed_total",
            "Effects that failed policy or execution.",
            snap.effector_effects_failed,
        );
        counter(
            "effector_effects_idempotent_total",
            "Redeliveries skipped on an existing idempotent key.",
            snap.effector_effects_idempotent,
        );
        counter(
            "pipeline_messages_processed_total",
            "Messages settled successfully.",
            snap.messages_processed,
        );
        counter(
            "pipeline_messages_terminated_total",
            "Malformed messages terminated.",
            snap.messages_terminated,
        );
        counter(
            "pipeline_messages_retried_total",
            "Transient failures negatively acknowledged.",
            snap.messages_retried,
        );
        out.push_str(&format!(
            "# HELP authorizer_proposals_pending Broker handles retained awaiting a human.\n\
             # TYPE authorizer_proposals_pending gauge\n\
             authorizer_proposals_pending {}\n",
            snap.authorizer_proposals_pending
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = PipelineMetrics::default();
        PipelineMetrics::incr(&metrics.effector_effects_idempotent);
        PipelineMetrics::incr(&metrics.effector_effects_idempotent);
        metrics
            .authorizer_proposals_pending
            .fetch_add(3, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.effector_effects_idempotent, 2);
        assert_eq!(snap.authorizer_proposals_pending, 3);
    }

    #[test]
    fn prometheus_rendering_carries_fixed_names() {
        let metrics = PipelineMetrics::default();
        PipelineMetrics::incr(&metrics.effector_effects_idempotent);
        let text = metrics.render_prometheus();
        assert!(text.contains("effector_effects_idempotent_total 1"));
        assert!(text.contains("# TYPE sensor_detections_emitted_total counter"));
        assert!(text.contains("# TYPE authorizer_proposals_pending gauge"));
    }
}
