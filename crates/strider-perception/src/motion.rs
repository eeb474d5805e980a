//! Dead reckoning from successive geographic fixes.
//!
//! The pose stream carries no heading or velocity, so both are derived from
//! how the root moves between applied frames.  [`motion_heading`] is the
//! pure bearing estimate; [`MotionEstimator`] adds the bookkeeping needed to
//! produce a smoothed ground speed.

use strider_types::GeoFix;

use crate::geo;

/// Displacements below this (degrees of arc, longitude cosine-scaled) carry
/// no heading signal.
pub const MOTION_NOISE_FLOOR_DEG: f64 = 5e-9;

/// Compass bearing of the move from `prev` to `cur` (radians, clockwise from
/// north), or `None` when the displacement is within the noise floor.
pub fn motion_heading(prev: GeoFix, cur: GeoFix) -> Option<f64> {
    if !prev.is_finite() || !cur.is_finite() {
        return None;
    }
    let (east, north) = geo::arc_delta_deg(prev, cur);
    if east.hypot(north) < MOTION_NOISE_FLOOR_DEG {
        return None;
    }
    Some(geo::wrap_pi(east.atan2(north)))
}

/// Output of one [`MotionEstimator::update`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSample {
    /// Bearing of travel, if the robot moved beyond the noise floor.
    pub heading: Option<f64>,
    /// Smoothed ground speed (m/s).
    pub speed_mps: f64,
}

/// Tracks the last anchor fix and produces heading + smoothed speed.
///
/// The anchor only advances once the robot has moved past the noise floor,
/// so slow walking at a high frame rate still accumulates a usable baseline.
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    anchor: Option<(GeoFix, f64)>,
    speed_mps: f64,
    speed_blend: f64,
    still_timeout_s: f64,
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(0.35, 1.0)
    }
}

impl MotionEstimator {
    /// `speed_blend` is the exponential smoothing rate for speed;
    /// `still_timeout_s` is how long the robot may sit within the noise
    /// floor before speed is forced to zero.
    pub fn new(speed_blend: f64, still_timeout_s: f64) -> Self {
        Self {
            anchor: None,
            speed_mps: 0.0,
            speed_blend: speed_blend.clamp(0.0, 1.0),
            still_timeout_s,
        }
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    /// Feed the fix of a newly applied frame stamped `t` (seconds).
    pub fn update(&mut self, fix: GeoFix, t: f64) -> MotionSample {
        let Some((anchor, anchor_t)) = self.anchor else {
            self.anchor = Some((fix, t));
            return MotionSample {
                heading: None,
                speed_mps: self.speed_mps,
            };
        };

        let dt = t - anchor_t;
        if !dt.is_finite() || dt <= 0.0 {
            // Timestamp went backwards (simulator restart): start over.
            self.anchor = Some((fix, t));
            self.speed_mps = 0.0;
            return MotionSample::default();
        }

        match motion_heading(anchor, fix) {
            Some(heading) => {
                let instant = geo::distance_m(anchor, fix) / dt;
                self.speed_mps += (instant - self.speed_mps) * self.speed_blend;
                self.anchor = Some((fix, t));
                MotionSample {
                    heading: Some(heading),
                    speed_mps: self.speed_mps,
                }
            }
            None => {
                if dt > self.still_timeout_s {
                    self.speed_mps = 0.0;
                    self.anchor = Some((fix, t));
                }
                MotionSample {
                    heading: None,
                    speed_mps: self.speed_mps,
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.speed_mps = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_fix;
    use std::f64::consts::FRAC_PI_2;

    fn origin() -> GeoFix {
        GeoFix::new(-33.8568, 151.2153)
    }

    #[test]
    fn heading_north_is_zero() {
        let a = origin();
        let b = offset_fix(a, 0.0, 2.0);
        let h = motion_heading(a, b).expect("2 m move must carry heading");
        assert!(h.abs() < 1e-6, "heading={h}");
    }

    #[test]
    fn heading_east_is_quarter_turn() {
        let a = origin();
        let b = offset_fix(a, FRAC_PI_2, 1.0);
        let h = motion_heading(a, b).unwrap();
        assert!((h - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn no_signal_below_noise_floor() {
        let a = origin();
        let b = GeoFix::new(a.lat + 1e-9, a.lon);
        assert!(motion_heading(a, b).is_none());
        assert!(motion_heading(a, a).is_none());
    }

    #[test]
    fn non_finite_has_no_signal() {
        assert!(motion_heading(origin(), GeoFix::new(f64::NAN, 0.0)).is_none());
    }

    #[test]
    fn estimator_reports_speed() {
        let mut est = MotionEstimator::new(1.0, 1.0);
        let a = origin();
        assert!(est.update(a, 0.0).heading.is_none());
        let b = offset_fix(a, 0.0, 1.0);
        let s = est.update(b, 1.0);
        assert!(s.heading.unwrap().abs() < 1e-6);
        assert!((s.speed_mps - 1.0).abs() < 1e-3, "speed={}", s.speed_mps);
    }

    #[test]
    fn estimator_smooths_speed() {
        let mut est = MotionEstimator::new(0.5, 1.0);
        let a = origin();
        est.update(a, 0.0);
        let s = est.update(offset_fix(a, 0.0, 2.0), 1.0);
        assert!((s.speed_mps - 1.0).abs() < 1e-3);
    }

    #[test]
    fn estimator_decays_to_zero_when_still() {
        let mut est = MotionEstimator::new(1.0, 1.0);
        let a = origin();
        est.update(a, 0.0);
        let b = offset_fix(a, 0.0, 1.0);
        est.update(b, 1.0);
        assert!(est.speed_mps() > 0.5);
        // Holding position for longer than the still timeout.
        let s = est.update(b, 2.5);
        assert!(s.heading.is_none());
        assert_eq!(s.speed_mps, 0.0);
    }

    #[test]
    fn backwards_timestamp_resets() {
        let mut est = MotionEstimator::new(1.0, 1.0);
        let a = origin();
        est.update(a, 10.0);
        let s = est.update(offset_fix(a, 0.0, 1.0), 5.0);
        assert_eq!(s, MotionSample::default());
    }
}
