//! Angle and small-area geodesy helpers.
//!
//! All geographic offsets use the equirectangular approximation, which is
//! accurate to well under a centimetre over the tens of metres the client
//! ever reasons about.

use std::f64::consts::{PI, TAU};

use strider_types::GeoFix;

/// Equatorial Earth radius (metres), WGS-84.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Wrap an angle into `(-π, π]`.
pub fn wrap_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI { PI } else { wrapped }
}

/// Wrap an angle into `[0, 2π)`.
pub fn wrap_tau(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}

/// Signed shortest rotation taking `from` to `to`, in `(-π, π]`.
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    wrap_pi(to - from)
}

/// Move `from` toward `to` by `rate` along the shortest circular path.
///
/// `rate` of 0 keeps `from`, 1 lands on `to`.  The result is wrapped into
/// `(-π, π]`.
pub fn blend_angle(from: f64, to: f64, rate: f64) -> f64 {
    wrap_pi(from + shortest_delta(from, to) * rate.clamp(0.0, 1.0))
}

/// Compass degrees in `[0, 360)` for a heading in radians.
pub fn to_compass_deg(heading_rad: f64) -> f64 {
    let deg = wrap_tau(heading_rad).to_degrees();
    if deg >= 360.0 { 0.0 } else { deg }
}

/// Displacement from `a` to `b` as `(east, north)` in degrees of arc,
/// longitude scaled by the cosine of the mean latitude.
pub fn arc_delta_deg(a: GeoFix, b: GeoFix) -> (f64, f64) {
    let mean_lat = ((a.lat + b.lat) * 0.5).to_radians();
    ((b.lon - a.lon) * mean_lat.cos(), b.lat - a.lat)
}

/// Ground distance between two fixes (metres).
pub fn distance_m(a: GeoFix, b: GeoFix) -> f64 {
    let (east, north) = arc_delta_deg(a, b);
    east.hypot(north).to_radians() * EARTH_RADIUS_M
}

/// Compass bearing from `a` to `b` (radians, clockwise from north).
pub fn bearing_rad(a: GeoFix, b: GeoFix) -> f64 {
    let (east, north) = arc_delta_deg(a, b);
    wrap_pi(east.atan2(north))
}

/// The fix reached by walking `distance_m` along compass `bearing` from
/// `origin`.
pub fn offset_fix(origin: GeoFix, bearing: f64, distance_m: f64) -> GeoFix {
    let north_m = distance_m * bearing.cos();
    let east_m = distance_m * bearing.sin();
    let lat = origin.lat + (north_m / EARTH_RADIUS_M).to_degrees();
    let lon = origin.lon + (east_m / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    GeoFix::new(lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn wrap_pi_range() {
        assert!((wrap_pi(2.5 * PI) - 0.5 * PI).abs() < EPS);
        assert!((wrap_pi(-PI) - PI).abs() < EPS);
        assert!((wrap_pi(TAU + 0.5) - 0.5).abs() < EPS);
        assert!((wrap_pi(-0.5) + 0.5).abs() < EPS);
    }

    #[test]
    fn blend_350_toward_10_passes_through_zero() {
        let from = 350f64.to_radians();
        let to = 10f64.to_radians();
        let half = blend_angle(from, to, 0.5);
        assert!(to_compass_deg(half).abs() < 1e-6 || (to_compass_deg(half) - 360.0).abs() < 1e-6);

        // A small step must keep moving forward (clockwise) through 360°.
        let step = to_compass_deg(blend_angle(from, to, 0.25));
        assert!((step - 355.0).abs() < 1e-6, "expected 355°, got {step}");
    }

    #[test]
    fn blend_10_toward_350_goes_backward() {
        let r = to_compass_deg(blend_angle(10f64.to_radians(), 350f64.to_radians(), 0.5));
        assert!(r < 1e-6 || (r - 360.0).abs() < 1e-6, "got {r}");
    }

    #[test]
    fn blend_rate_is_clamped() {
        let r = blend_angle(0.0, 1.0, 5.0);
        assert!((r - 1.0).abs() < EPS);
        let r = blend_angle(0.0, 1.0, -1.0);
        assert!(r.abs() < EPS);
    }

    #[test]
    fn compass_degrees() {
        assert!((to_compass_deg(-PI / 2.0) - 270.0).abs() < 1e-9);
        assert!(to_compass_deg(0.0).abs() < 1e-9);
    }

    #[test]
    fn offset_then_measure_roundtrip() {
        let origin = GeoFix::new(-33.8568, 151.2153);
        let moved = offset_fix(origin, 0.7, 12.0);
        assert!((distance_m(origin, moved) - 12.0).abs() < 1e-3);
        assert!((bearing_rad(origin, moved) - 0.7).abs() < 1e-4);
    }

    #[test]
    fn north_offset_has_zero_bearing() {
        let origin = GeoFix::new(37.0, -122.0);
        let north = offset_fix(origin, 0.0, 2.0);
        assert!(bearing_rad(origin, north).abs() < 1e-9);
        assert!((north.lon - origin.lon).abs() < 1e-15);
    }
}
