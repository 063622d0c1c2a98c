//! Geographic math for dispatch and simulation.
//!
//! Two distance models live here side by side:
//!
//! - **Geodesic** (`haversine_m`): great-circle meters, used for the dispatch
//!   search radius, route length and depot selection.
//! - **Coordinate-degree** (`planar_distance_deg`, `step_toward`): Euclidean
//!   distance in raw longitude/latitude degrees, used by the per-tick movement
//!   model. One degree of longitude shrinks toward the poles, so simulated
//!   speed and the arrival threshold are latitude-dependent.

use crate::GeoPoint;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (Haversine formula)
#[must_use]
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b`, degrees clockwise from north in [0, 360)
#[must_use]
pub fn bearing_deg(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Linear interpolation between two points, `t` clamped to [0, 1]
#[must_use]
pub fn interpolate(from: &GeoPoint, to: &GeoPoint, t: f64) -> GeoPoint {
    let t = t.clamp(0.0, 1.0);
    GeoPoint {
        longitude: from.longitude + (to.longitude - from.longitude) * t,
        latitude: from.latitude + (to.latitude - from.latitude) * t,
    }
}

/// Euclidean distance in coordinate degrees
#[must_use]
pub fn planar_distance_deg(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let dx = b.longitude - a.longitude;
    let dy = b.latitude - a.latitude;
    dx.hypot(dy)
}

/// Move `step_deg` along the straight line from `from` toward `to`.
///
/// The direction vector is normalized, so the displacement is exactly
/// `step_deg` unless the target is closer than that, in which case the
/// result is the target itself.
#[must_use]
pub fn step_toward(from: &GeoPoint, to: &GeoPoint, step_deg: f64) -> GeoPoint {
    let distance = planar_distance_deg(from, to);
    if distance <= step_deg || distance == 0.0 {
        return *to;
    }

    let dx = to.longitude - from.longitude;
    let dy = to.latitude - from.latitude;
    GeoPoint {
        longitude: from.longitude + dx / distance * step_deg,
        latitude: from.latitude + dy / distance * step_deg,
    }
}

/// Total geodesic length of a polyline in meters
#[must_use]
pub fn path_length_m(path: &[GeoPoint]) -> f64 {
    path.windows(2).map(|w| haversine_m(&w[0], &w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_at_equator() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = haversine_m(&a, &b);
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert!((bearing_deg(&origin, &GeoPoint::new(0.0, 1.0)) - 0.0).abs() < 1e-9);
        assert!((bearing_deg(&origin, &GeoPoint::new(1.0, 0.0)) - 90.0).abs() < 1e-9);
        assert!((bearing_deg(&origin, &GeoPoint::new(-1.0, 0.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_toward_has_fixed_magnitude() {
        let from = GeoPoint::new(10.0, 20.0);
        let to = GeoPoint::new(13.0, 24.0);
        let next = step_toward(&from, &to, 0.0001);

        let moved = planar_distance_deg(&from, &next);
        assert!((moved - 0.0001).abs() < 1e-12);

        // Same direction as from -> to (3-4-5 triangle)
        let dx = (next.longitude - from.longitude) / moved;
        let dy = (next.latitude - from.latitude) / moved;
        assert!((dx - 0.6).abs() < 1e-9);
        assert!((dy - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_step_toward_clamps_at_target() {
        let from = GeoPoint::new(0.0, 0.0);
        let to = GeoPoint::new(0.00005, 0.0);
        assert_eq!(step_toward(&from, &to, 0.0001), to);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let mid = interpolate(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(2.0, 4.0), 0.5);
        assert_eq!(mid, GeoPoint::new(1.0, 2.0));
    }

    #[test]
    fn test_path_length_sums_segments() {
        let path = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(2.0, 0.0),
        ];
        let direct = haversine_m(&path[0], &path[2]);
        assert!((path_length_m(&path) - direct).abs() < 1e-6);
        assert_eq!(path_length_m(&path[..1]), 0.0);
    }
}
