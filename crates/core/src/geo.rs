//! Geographic primitives shared by the sensor, correlator, and query surface.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic position. Altitude is metres above sea level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Speed and direction of travel. Heading is degrees clockwise from true
/// north, normalized to `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Velocity {
    pub speed_mps: f64,
    pub heading_deg: f64,
}

/// Great-circle distance between two positions in metres (haversine).
/// Altitude is ignored.
#[must_use]
pub fn haversine_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Component-wise arithmetic mean of positions. Returns `None` for an empty
/// slice.
#[must_use]
pub fn mean_position(positions: &[Position]) -> Option<Position> {
    if positions.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = positions.len() as f64;
    Some(Position {
        latitude: positions.iter().map(|p| p.latitude).sum::<f64>() / n,
        longitude: positions.iter().map(|p| p.longitude).sum::<f64>() / n,
        altitude: positions.iter().map(|p| p.altitude).sum::<f64>() / n,
    })
}

/// Circular mean of headings in degrees: the angle of the sum of unit
/// vectors. A plain arithmetic mean of 350° and 10° would give 180°; the
/// circular mean correctly gives 0°. Returns `None` for an empty slice or
/// when the vectors cancel exactly.
#[must_use]
pub fn circular_mean_heading(headings_deg: &[f64]) -> Option<f64> {
    if headings_deg.is_empty() {
        return None;
    }
    let (sum_sin, sum_cos) = headings_deg
        .iter()
        .map(|h| h.to_radians())
        .fold((0.0_f64, 0.0_f64), |(s, c), r| (s + r.sin(), c + r.cos()));
    if sum_sin.abs() < 1e-12 && sum_cos.abs() < 1e-12 {
        return None;
    }
    let mean = sum_sin.atan2(sum_cos).to_degrees();
    Some((mean + 360.0) % 360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position {
            latitude: lat,
            longitude: lon,
            altitude: 0.0,
        }
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = pos(35.0, 139.0);
        assert!(haversine_m(&p, &p) < 1e-6);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        // One degree of latitude is roughly 111 km everywhere.
        let d = haversine_m(&pos(10.0, 20.0), &pos(11.0, 20.0));
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn haversine_small_offset() {
        // ~0.0045 degrees latitude is roughly 500 m.
        let d = haversine_m(&pos(35.0, 139.0), &pos(35.0045, 139.0));
        assert!((d - 500.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn mean_position_averages_components() {
        let m = mean_position(&[
            Position {
                latitude: 10.0,
                longitude: 20.0,
                altitude: 100.0,
            },
            Position {
                latitude: 12.0,
                longitude: 22.0,
                altitude: 300.0,
            },
        ])
        .unwrap();
        assert!((m.latitude - 11.0).abs() < 1e-9);
        assert!((m.longitude - 21.0).abs() < 1e-9);
        assert!((m.altitude - 200.0).abs() < 1e-9);
    }

    #[test]
    fn mean_position_empty() {
        assert!(mean_position(&[]).is_none());
    }

    #[test]
    fn circular_mean_wraps_north() {
        let m = circular_mean_heading(&[350.0, 10.0]).unwrap();
        assert!(m < 1e-6 || (m - 360.0).abs() < 1e-6, "got {m}");
    }

    #[test]
    fn circular_mean_plain_case() {
        let m = circular_mean_heading(&[80.0, 100.0]).unwrap();
        assert!((m - 90.0).abs() < 1e-6, "got {m}");
    }

    #[test]
    fn circular_mean_opposite_vectors_cancel() {
        assert!(circular_mean_heading(&[0.0, 180.0]).is_none());
    }

    #[test]
    fn circular_mean_empty() {
        assert!(circular_mean_heading(&[]).is_none());
    }
}
