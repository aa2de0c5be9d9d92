//! The correlator's sliding window of recently seen classified tracks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sentinel_core::{Track, haversine_m};

/// Maximum separation for two distinct tracks to merge.
pub const MERGE_DISTANCE_M: f64 = 500.0;

/// Maximum relative speed difference: within 20 % of the pair's mean.
pub const MERGE_SPEED_BAND: f64 = 0.2;

struct WindowEntry {
    track: Track,
    merged: bool,
    inserted_at: Instant,
}

/// Time-bounded, mutex-guarded set of recently observed tracks keyed by
/// track id. Entries past the TTL are removed by the background sweeper and
/// ignored by lookups in between sweeps.
pub struct SlidingWindow {
    entries: Mutex<HashMap<String, WindowEntry>>,
    ttl: Duration,
}

/// Whether two tracks may merge: identical id, or identical classification
/// and type within [`MERGE_DISTANCE_M`] and the speed band.
#[must_use]
pub fn merge_eligible(a: &Track, b: &Track) -> bool {
    if a.track_id == b.track_id {
        return true;
    }
    if a.classification != b.classification || a.track_type != b.track_type {
        return false;
    }
    if haversine_m(&a.position, &b.position) > MERGE_DISTANCE_M {
        return false;
    }
    let mean_speed = f64::midpoint(a.velocity.speed_mps, b.velocity.speed_mps);
    if mean_speed <= f64::EPSILON {
        return true;
    }
    (a.velocity.speed_mps - b.velocity.speed_mps).abs() <= MERGE_SPEED_BAND * mean_speed
}

impl SlidingWindow {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mark every live, un-merged, merge-eligible entry as merged and return
    /// the absorbed tracks, then insert `current` as a fresh entry.
    ///
    /// First-seen wins: `current` becomes the surviving entry; absorbed
    /// siblings stay marked until the TTL removes them so they cannot merge
    /// twice.
    pub fn absorb(&self, current: &Track) -> Vec<Track> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let mut absorbed = Vec::new();
        for entry in entries.values_mut() {
            if entry.merged
                || now.duration_since(entry.inserted_at) > self.ttl
                || entry.track.envelope.message_id == current.envelope.message_id
            {
                continue;
            }
            if merge_eligible(&entry.track, current) {
                entry.merged = true;
                absorbed.push(entry.track.clone());
            }
        }

        entries.insert(
            current.track_id.clone(),
            WindowEntry {
                track: current.clone(),
                merged: false,
                inserted_at: now,
            },
        );
        absorbed
    }

    /// Remove entries past the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        before - entries.len()
    }

    /// Current entry count (swept and un-swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Classification, Envelope, Position, SourceType, TrackType, Velocity};
    use uuid::Uuid;

    fn track(id: &str, lat: f64, speed: f64) -> Track {
        Track::classified(
            &Envelope::root("sensor-1", SourceType::Sensor),
            "classifier-1",
            id,
            Classification::Hostile,
            TrackType::Aircraft,
            Position {
                latitude: lat,
                longitude: 139.0,
                altitude: 9_000.0,
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
    fn same_id_always_merges() {
        let a = track("H-1", 35.0, 250.0);
        let mut b = track("H-1", 36.0, 500.0);
        b.classification = Classification::Unknown;
        assert!(merge_eligible(&a, &b));
    }

    #[test]
    fn distinct_ids_need_class_type_distance_and_speed() {
        let a = track("H-1", 35.0, 250.0);

        // ~220 m north, similar speed: merges.
        let close = track("H-2", 35.002, 260.0);
        assert!(merge_eligible(&a, &close));

        // Too far apart.
        let far = track("H-3", 35.02, 250.0);
        assert!(!merge_eligible(&a, &far));

        // Speeds outside 20% of the mean: 250 vs 320 (mean 285, band 57).
        let fast = track("H-4", 35.002, 320.0);
        assert!(!merge_eligible(&a, &fast));

        // Different type.
        let mut vessel = track("H-5", 35.002, 250.0);
        vessel.track_type = TrackType::Vessel;
        assert!(!merge_eligible(&a, &vessel));

        // Different classification.
        let mut friendly = track("H-6", 35.002, 250.0);
        friendly.classification = Classification::Friendly;
        assert!(!merge_eligible(&a, &friendly));
    }

    #[test]
    fn absorb_marks_siblings_once() {
        let window = SlidingWindow::new(Duration::from_secs(10));
        let first = track("H-1", 35.0, 250.0);
        assert!(window.absorb(&first).is_empty());

        let second = track("H-2", 35.002, 255.0);
        let absorbed = window.absorb(&second);
        assert_eq!(absorbed.len(), 1);
        assert_eq!(absorbed[0].track_id, "H-1");

        // H-1 is already merged; a third arrival only absorbs the live H-2.
        let third = track("H-3", 35.001, 252.0);
        let absorbed = window.absorb(&third);
        assert_eq!(absorbed.len(), 1);
        assert_eq!(absorbed[0].track_id, "H-2");
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let window = SlidingWindow::new(Duration::from_millis(10));
        window.absorb(&track("H-1", 35.0, 250.0));
        assert_eq!(window.len(), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(window.sweep(), 1);
        assert!(window.is_empty());
    }

    #[test]
    fn expired_entries_do_not_merge_before_sweep() {
        let window = SlidingWindow::new(Duration::from_millis(10));
        window.absorb(&track("H-1", 35.0, 250.0));
        std::thread::sleep(Duration::from_millis(30));
        let absorbed = window.absorb(&track("H-2", 35.002, 255.0));
        assert!(absorbed.is_empty(), "expired entries are dead to merges");
    }
}
