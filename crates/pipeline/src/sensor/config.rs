//! Runtime-mutable sensor configuration.
//!
//! A PATCH may update any subset of fields and must be consistent across the
//! publish loop's next tick, so the whole struct lives under one
//! reader-writer lock and mutation goes through [`SensorConfig::apply`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sentinel_core::{Classification, TrackType, ValidationError};

/// Emission interval bounds, inclusive.
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 10_000;

/// Simulated track count bounds, inclusive.
pub const MIN_TRACK_COUNT: usize = 1;
pub const MAX_TRACK_COUNT: usize = 100;

/// The sensor's externally visible configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SensorConfig {
    /// Milliseconds between emission ticks, in `[100, 10000]`.
    pub emission_interval_ms: u64,
    /// Simulated tracks per tick, in `[1, 100]`.
    pub track_count: usize,
    /// When paused the loop idles without emitting.
    pub paused: bool,
    /// Relative weights for drawing new track types. At least one must be
    /// positive.
    pub type_weights: BTreeMap<TrackType, u32>,
    /// Relative weights for drawing new track classifications. Missiles
    /// ignore this table (see [`missile_classification_weights`]).
    pub classification_weights: BTreeMap<Classification, u32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            emission_interval_ms: 1_000,
            track_count: 10,
            paused: false,
            type_weights: BTreeMap::from([
                (TrackType::Aircraft, 30),
                (TrackType::Vessel, 25),
                (TrackType::Ground, 25),
                (TrackType::Missile, 5),
                (TrackType::Unknown, 15),
            ]),
            classification_weights: BTreeMap::from([
                (Classification::Friendly, 40),
                (Classification::Hostile, 20),
                (Classification::Neutral, 25),
                (Classification::Unknown, 15),
            ]),
        }
    }
}

/// Fixed override encoding "missiles are almost always hostile".
#[must_use]
pub fn missile_classification_weights() -> BTreeMap<Classification, u32> {
    BTreeMap::from([(Classification::Hostile, 90), (Classification::Unknown, 10)])
}

impl SensorConfig {
    #[must_use]
    pub fn emission_interval(&self) -> Duration {
        Duration::from_millis(self.emission_interval_ms)
    }

    /// Enforce the configured ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&self.emission_interval_ms) {
            return Err(ValidationError::new(
                "sensor.emission_interval_ms",
                format!(
                    "must be within [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}], got {}",
                    self.emission_interval_ms
                ),
            ));
        }
        if !(MIN_TRACK_COUNT..=MAX_TRACK_COUNT).contains(&self.track_count) {
            return Err(ValidationError::new(
                "sensor.track_count",
                format!(
                    "must be within [{MIN_TRACK_COUNT}, {MAX_TRACK_COUNT}], got {}",
                    self.track_count
                ),
            ));
        }
        if self.type_weights.values().all(|w| *w == 0) {
            return Err(ValidationError::new(
                "sensor.type_weights",
                "at least one weight must be positive",
            ));
        }
        if self.classification_weights.values().all(|w| *w == 0) {
            return Err(ValidationError::new(
                "sensor.classification_weights",
                "at least one weight must be positive",
            ));
        }
        Ok(())
    }

    /// Apply a partial update, returning the merged configuration. The
    /// result is validated as a whole so a patch cannot leave the config
    /// inconsistent.
    pub fn apply(&self, patch: &SensorConfigPatch) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        if let Some(interval) = patch.emission_interval_ms {
            next.emission_interval_ms = interval;
        }
        if let Some(count) = patch.track_count {
            next.track_count = count;
        }
        if let Some(paused) = patch.paused {
            next.paused = paused;
        }
        if let Some(ref weights) = patch.type_weights {
            next.type_weights = weights.clone();
        }
        if let Some(ref weights) = patch.classification_weights {
            next.classification_weights = weights.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update body for `PATCH /api/v1/sensor/config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SensorConfigPatch {
    pub emission_interval_ms: Option<u64>,
    pub track_count: Option<usize>,
    pub paused: Option<bool>,
    pub type_weights: Option<BTreeMap<TrackType, u32>>,
    pub classification_weights: Option<BTreeMap<Classification, u32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SensorConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn interval_bounds_inclusive() {
        let config = SensorConfig::default();
        for (ms, ok) in [(99, false), (100, true), (10_000, true), (10_001, false)] {
            let result = config.apply(&SensorConfigPatch {
                emission_interval_ms: Some(ms),
                ..Default::default()
            });
            assert_eq!(result.is_ok(), ok, "interval {ms}");
        }
    }

    #[test]
    fn track_count_bounds_inclusive() {
        let config = SensorConfig::default();
        for (count, ok) in [(0, false), (1, true), (100, true), (101, false)] {
            let result = config.apply(&SensorConfigPatch {
                track_count: Some(count),
                ..Default::default()
            });
            assert_eq!(result.is_ok(), ok, "count {count}");
        }
    }

    #[test]
    fn all_zero_weights_rejected() {
        let config = SensorConfig::default();
        let result = config.apply(&SensorConfigPatch {
            type_weights: Some(BTreeMap::from([(TrackType::Aircraft, 0)])),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn patch_merges_subset() {
        let config = SensorConfig::default();
        let next = config
            .apply(&SensorConfigPatch {
                paused: Some(true),
                track_count: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert!(next.paused);
        assert_eq!(next.track_count, 3);
        assert_eq!(next.emission_interval_ms, config.emission_interval_ms);
        assert_eq!(next.type_weights, config.type_weights);
    }

    #[test]
    fn missile_override_is_hostile_heavy() {
        let weights = missile_classification_weights();
        assert_eq!(weights.get(&Classification::Hostile), Some(&90));
        assert_eq!(weights.get(&Classification::Unknown), Some(&10));
        assert_eq!(weights.len(), 2);
    }

    #[test]
    fn config_serde_round_trip() {
        let config = SensorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SensorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.type_weights, config.type_weights);
        assert_eq!(back.emission_interval_ms, config.emission_interval_ms);
    }
}
