//! Synthetic track motion model.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;

use sentinel_core::{Classification, Position, TrackType, Velocity};

/// Metres per degree of latitude.
const METERS_PER_DEG_LAT: f64 = 111_111.0;

/// Heading jitter per tick, degrees either way.
const HEADING_JITTER_DEG: f64 = 10.0;

/// Draw a key from a weight table. Keys are visited in sorted order, so the
/// draw is deterministic for a given RNG stream even under equal weights.
pub fn weighted_choice<K: Copy + Ord, R: Rng>(weights: &BTreeMap<K, u32>, rng: &mut R) -> Option<K> {
    let total: u64 = weights.values().map(|w| u64::from(*w)).sum();
    if total == 0 {
        return None;
    }
    let mut draw = rng.gen_range(0..total);
    for (key, weight) in weights {
        let weight = u64::from(*weight);
        if draw < weight {
            return Some(*key);
        }
        draw -= weight;
    }
    None
}

/// One simulated platform moving through the area of operations.
#[derive(Debug, Clone)]
pub struct SimTrack {
    pub track_id: String,
    pub track_type: TrackType,
    pub classification: Classification,
    pub position: Position,
    pub velocity: Velocity,
}

impl SimTrack {
    /// Spawn a track with the per-type altitude and speed envelope. The id
    /// prefix encodes the classification so downstream rules stay
    /// deterministic.
    pub fn spawn<R: Rng>(
        index: u64,
        track_type: TrackType,
        classification: Classification,
        rng: &mut R,
    ) -> Self {
        let (altitude, speed) = match track_type {
            TrackType::Aircraft => (
                rng.gen_range(5_000.0..15_000.0),
                rng.gen_range(150.0..450.0),
            ),
            TrackType::Missile => (
                rng.gen_range(1_000.0..20_000.0),
                rng.gen_range(300.0..1_000.0),
            ),
            TrackType::Vessel => (0.0, rng.gen_range(5.0..35.0)),
            TrackType::Ground => (rng.gen_range(0.0..100.0), rng.gen_range(0.0..40.0)),
            TrackType::Unknown => (rng.gen_range(0.0..12_000.0), rng.gen_range(0.0..500.0)),
        };

        let prefix = match classification {
            Classification::Friendly => "F-",
            Classification::Hostile => "H-",
            Classification::Neutral => "N-",
            Classification::Unknown => "U-",
        };

        Self {
            track_id: format!("{prefix}TRK-{index:04}"),
            track_type,
            classification,
            position: Position {
                latitude: rng.gen_range(24.0..42.0),
                longitude: rng.gen_range(122.0..148.0),
                altitude,
            },
            velocity: Velocity {
                speed_mps: speed,
                heading_deg: rng.gen_range(0.0..360.0),
            },
        }
    }

    /// Advance the track by `speed · dt` along a stochastically jittering
    /// heading.
    pub fn advance<R: Rng>(&mut self, dt: Duration, rng: &mut R) {
        self.velocity.heading_deg = (self.velocity.heading_deg
            + rng.gen_range(-HEADING_JITTER_DEG..HEADING_JITTER_DEG)
            + 360.0)
            % 360.0;

        let distance = self.velocity.speed_mps * dt.as_secs_f64();
        let heading = self.velocity.heading_deg.to_radians();
        let dlat = distance * heading.cos() / METERS_PER_DEG_LAT;
        let meters_per_deg_lon = METERS_PER_DEG_LAT * self.position.latitude.to_radians().cos();
        let dlon = if meters_per_deg_lon.abs() > f64::EPSILON {
            distance * heading.sin() / meters_per_deg_lon
        } else {
            0.0
        };

        self.position.latitude += dlat;
        self.position.longitude += dlon;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn weighted_choice_respects_zero_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = BTreeMap::from([
            (TrackType::Aircraft, 0),
            (TrackType::Missile, 5),
            (TrackType::Vessel, 0),
        ]);
        for _ in 0..50 {
            assert_eq!(weighted_choice(&weights, &mut rng), Some(TrackType::Missile));
        }
    }

    #[test]
    fn weighted_choice_empty_or_zero_total() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            weighted_choice::<TrackType, _>(&BTreeMap::new(), &mut rng),
            None
        );
        let zeroes = BTreeMap::from([(TrackType::Aircraft, 0)]);
        assert_eq!(weighted_choice(&zeroes, &mut rng), None);
    }

    #[test]
    fn weighted_choice_covers_all_positive_keys() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = BTreeMap::from([(TrackType::Aircraft, 1), (TrackType::Vessel, 1)]);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            seen.insert(weighted_choice(&weights, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn spawn_respects_type_envelopes() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let aircraft = SimTrack::spawn(1, TrackType::Aircraft, Classification::Friendly, &mut rng);
            assert!((5_000.0..15_000.0).contains(&aircraft.position.altitude));
            assert!((150.0..450.0).contains(&aircraft.velocity.speed_mps));

            let missile = SimTrack::spawn(2, TrackType::Missile, Classification::Hostile, &mut rng);
            assert!((300.0..1_000.0).contains(&missile.velocity.speed_mps));

            let vessel = SimTrack::spawn(3, TrackType::Vessel, Classification::Neutral, &mut rng);
            assert!(vessel.position.altitude.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn spawn_encodes_classification_prefix() {
        let mut rng = StdRng::seed_from_u64(1);
        let track = SimTrack::spawn(42, TrackType::Aircraft, Classification::Hostile, &mut rng);
        assert_eq!(track.track_id, "H-TRK-0042");
        assert_eq!(
            Classification::from_track_id_prefix(&track.track_id),
            Some(Classification::Hostile)
        );
    }

    #[test]
    fn advance_moves_proportionally_to_speed() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut track = SimTrack::spawn(1, TrackType::Aircraft, Classification::Friendly, &mut rng);
        track.velocity.speed_mps = 300.0;
        let before = track.position;
        track.advance(Duration::from_secs(1), &mut rng);
        let moved = sentinel_core::haversine_m(&before, &track.position);
        assert!((moved - 300.0).abs() < 30.0, "moved {moved} m");
    }
}
