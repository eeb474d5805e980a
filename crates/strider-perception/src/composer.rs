//! Spatial pose composer.
//!
//! Fuses the reported orientation, the dead-reckoned motion heading and the
//! terrain height into the pose the robot is drawn at.
//!
//! Per applied frame, in order:
//!
//! | Step | Input | Output |
//! |------|-------|--------|
//! | 1 | fix | terrain height + ground offset |
//! | 2 | quaternion | reported heading / pitch / roll |
//! | 3 | motion heading − offset | heading blended toward motion (0.72) |
//! | 4 | blended heading | smoothed heading (0.32 moving / 0.08 otherwise) |
//! | 5 | smoothed heading | calibration update |
//! | 6 | smoothed + offset | final render heading |
//!
//! The calibration offset used in step 3 is read before step 5 updates it.

use std::f64::consts::FRAC_PI_2;

use strider_types::{GeoFix, RobotTelemetry, RootPose};
use tracing::debug;

use crate::calibration::{CalibrationUpdate, HeadingCalibrationEngine};
use crate::geo::{blend_angle, to_compass_deg, wrap_pi};
use crate::motion::MotionEstimator;
use crate::terrain::{TerrainHeightEstimator, TerrainQuery};
use crate::transform::{EulerAngles, Quaternion, Transform3D, Vec3};

/// Tuning for [`SpatialPoseComposer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerConfig {
    /// Added to the terrain height so the feet rest on the surface.
    pub ground_offset_m: f64,
    /// Pull of the motion heading over the reported heading.
    pub motion_blend: f64,
    pub smoothing_fast: f64,
    pub smoothing_slow: f64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            ground_offset_m: 0.0,
            motion_blend: 0.72,
            smoothing_fast: 0.32,
            smoothing_slow: 0.08,
        }
    }
}

/// Where and how to draw the robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPose {
    pub fix: GeoFix,
    /// Terrain height plus ground offset.
    pub height_m: f64,
    /// Compass heading, clockwise from north (radians).
    pub heading_rad: f64,
    pub pitch_rad: f64,
    pub roll_rad: f64,
}

impl RenderPose {
    /// Orientation in the Z-up, X-east world frame.
    pub fn orientation(&self) -> Quaternion {
        Quaternion::from_euler(EulerAngles {
            yaw: wrap_pi(FRAC_PI_2 - self.heading_rad),
            pitch: self.pitch_rad,
            roll: self.roll_rad,
        })
    }

    /// Local transform with the height on +Z; horizontal placement is carried
    /// by `fix`.
    pub fn transform(&self) -> Transform3D {
        Transform3D::new(Vec3::new(0.0, 0.0, self.height_m), self.orientation())
    }
}

/// Result of one [`SpatialPoseComposer::compose`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposedFrame {
    pub pose: RenderPose,
    pub motion_heading: Option<f64>,
    pub speed_mps: f64,
    pub calibration: CalibrationUpdate,
    /// `true` if the terrain was queried for this frame.
    pub terrain_sampled: bool,
}

/// Compass heading (radians) of the forward axis described by `q`.
pub fn reported_heading(q: Quaternion) -> (f64, EulerAngles) {
    let e = q.to_euler();
    (wrap_pi(FRAC_PI_2 - e.yaw), e)
}

/// Owns the per-robot estimators and produces one [`RenderPose`] per frame.
#[derive(Debug)]
pub struct SpatialPoseComposer {
    config: ComposerConfig,
    terrain: TerrainHeightEstimator,
    motion: MotionEstimator,
    calibration: HeadingCalibrationEngine,
    smoothed_heading: Option<f64>,
    last: Option<ComposedFrame>,
}

impl SpatialPoseComposer {
    pub fn new(
        config: ComposerConfig,
        terrain: TerrainHeightEstimator,
        calibration: HeadingCalibrationEngine,
    ) -> Self {
        Self {
            config,
            terrain,
            motion: MotionEstimator::default(),
            calibration,
            smoothed_heading: None,
            last: None,
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn terrain(&self) -> &TerrainHeightEstimator {
        &self.terrain
    }

    pub fn calibration(&self) -> &HeadingCalibrationEngine {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut HeadingCalibrationEngine {
        &mut self.calibration
    }

    /// Drop the motion anchor; the next frame starts a fresh baseline.
    pub fn restart_motion(&mut self) {
        self.motion.reset();
    }

    /// Most recently composed frame.
    pub fn last_frame(&self) -> Option<&ComposedFrame> {
        self.last.as_ref()
    }

    /// Telemetry snapshot attached to outbound reports.
    pub fn telemetry(&self) -> Option<RobotTelemetry> {
        self.last.map(|f| RobotTelemetry {
            lat: f.pose.fix.lat,
            lon: f.pose.fix.lon,
            height_m: f.pose.height_m,
            heading_deg: to_compass_deg(f.pose.heading_rad),
            speed_mps: f.speed_mps,
        })
    }

    /// Compose the render pose for `root` stamped `t` (simulator seconds).
    ///
    /// Returns `None` and leaves all state untouched when `root` is invalid.
    pub async fn compose(
        &mut self,
        t: f64,
        root: &RootPose,
        now_ms: u64,
        terrain: &dyn TerrainQuery,
    ) -> Option<ComposedFrame> {
        if !root.is_valid() || !t.is_finite() {
            return None;
        }
        let fix = root.fix();
        let motion = self.motion.update(fix, t);

        let resolved = self.terrain.resolve(fix, now_ms, terrain).await;
        let height_m = resolved.height_m + self.config.ground_offset_m;

        let (reported, euler) = reported_heading(Quaternion::from_array(root.quat));

        let offset = self.calibration.offset_rad();
        let blended = match motion.heading {
            Some(h) => blend_angle(reported, wrap_pi(h - offset), self.config.motion_blend),
            None => reported,
        };

        let rate = if motion.heading.is_some() {
            self.config.smoothing_fast
        } else {
            self.config.smoothing_slow
        };
        let smoothed = match self.smoothed_heading {
            Some(prev) => blend_angle(prev, blended, rate),
            None => blended,
        };
        self.smoothed_heading = Some(smoothed);

        let calibration = self
            .calibration
            .observe(smoothed, motion.heading, motion.speed_mps);
        if let CalibrationUpdate::FastLockComplete { offset_rad } = calibration {
            debug!(offset_deg = offset_rad.to_degrees(), "composer observed calibration lock");
        }

        let frame = ComposedFrame {
            pose: RenderPose {
                fix,
                height_m,
                heading_rad: wrap_pi(smoothed + self.calibration.offset_rad()),
                pitch_rad: euler.pitch,
                roll_rad: euler.roll,
            },
            motion_heading: motion.heading,
            speed_mps: motion.speed_mps,
            calibration,
            terrain_sampled: resolved.sampled,
        };
        self.last = Some(frame);
        Some(frame)
    }
}
