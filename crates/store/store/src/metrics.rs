use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time aggregate over the whole store, embedded in
/// `/api/v1/metrics` responses and the hub's periodic `metrics.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Tracks updated inside the query window.
    pub active_tracks: i64,
    pub detections: i64,
    pub proposals_pending: i64,
    pub proposals_approved: i64,
    pub proposals_denied: i64,
    pub proposals_expired: i64,
    pub decisions: i64,
    pub effects_executed: i64,
    pub effects_failed: i64,
    /// Persisted operational counters (`counters` table).
    pub counters: BTreeMap<String, i64>,
}

/// Throughput and latency for one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: String,
    /// Rows produced by the stage inside the window.
    pub processed: i64,
    /// Latency percentiles in milliseconds, where the stage has a measurable
    /// predecessor timestamp (proposal → decision, decision → effect).
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

/// End-to-end latency (first detection of a track to its executed effect)
/// over a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: i64,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Nearest-rank percentile over an unsorted sample set, in the same unit as
/// the samples. Returns `None` on an empty set.
#[must_use]
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted.get(rank.min(sorted.len() - 1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_none() {
        assert!(percentile(&[], 50.0).is_none());
    }

    #[test]
    fn percentile_bounds() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&samples, 0.0), Some(1.0));
        assert_eq!(percentile(&samples, 100.0), Some(100.0));
        let p50 = percentile(&samples, 50.0).unwrap();
        assert!((p50 - 50.0).abs() <= 1.0);
    }

    #[test]
    fn percentile_single_sample() {
        assert_eq!(percentile(&[42.0], 99.0), Some(42.0));
    }
}
