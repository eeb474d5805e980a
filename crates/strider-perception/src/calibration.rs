//! Heading calibration.
//!
//! The orientation quaternion streamed by the simulator does not necessarily
//! share a forward axis with the rendered model.  [`HeadingCalibrationEngine`]
//! learns that constant yaw offset online by comparing the reported heading
//! with the bearing the robot is actually travelling along.
//!
//! # Phases
//!
//! 1. **Fast lock** – large clamped corrections until either
//!    `fast_lock_streak` consecutive well-aligned samples are seen or
//!    `fast_lock_max_samples` samples have been consumed.  The offset is
//!    persisted on exit.
//! 2. **Slow trim** – small corrections that follow drift, persisted every
//!    `persist_every` samples, until `max_samples` is exhausted.
//!
//! A manual override, or an offset restored from the store, pins the offset
//! and disables both phases until
//! [`HeadingCalibrationEngine::clear_override`] is called.

use strider_types::{CalibrationStore, StriderError};
use tracing::{debug, info, warn};

use crate::geo::{shortest_delta, wrap_pi};

/// Empirically tuned calibration constants.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParams {
    /// Speed (m/s) below which no sample is taken.
    pub min_speed_mps: f64,
    /// Total sample budget across both phases.
    pub max_samples: u32,
    /// Errors larger than this (radians) are treated as noise.
    pub outlier_rad: f64,
    pub fast_gain: f64,
    pub fast_clamp_rad: f64,
    /// Errors at or below this count toward the alignment streak.
    pub aligned_rad: f64,
    pub fast_lock_streak: u32,
    pub fast_lock_max_samples: u32,
    pub trim_gain: f64,
    pub trim_clamp_rad: f64,
    pub persist_every: u32,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            min_speed_mps: 0.12,
            max_samples: 360,
            outlier_rad: 70f64.to_radians(),
            fast_gain: 0.35,
            fast_clamp_rad: 0.22,
            aligned_rad: 15f64.to_radians(),
            fast_lock_streak: 20,
            fast_lock_max_samples: 90,
            trim_gain: 0.06,
            trim_clamp_rad: 0.04,
            persist_every: 45,
        }
    }
}

/// Mutable calibration state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadingCalibrationState {
    pub offset_rad: f64,
    pub sample_count: u32,
    pub fast_lock_complete: bool,
    pub aligned_streak: u32,
}

/// What a single [`HeadingCalibrationEngine::observe`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationUpdate {
    /// Too slow, no motion signal, budget exhausted or manually pinned.
    Idle,
    /// Error exceeded the outlier bound; state unchanged.
    Outlier { error_rad: f64 },
    /// Offset adjusted.
    Adjusted { offset_rad: f64, error_rad: f64 },
    /// Fast lock just finished; offset persisted.
    FastLockComplete { offset_rad: f64 },
}

/// Online estimator for the static heading offset.
pub struct HeadingCalibrationEngine {
    params: CalibrationParams,
    state: HeadingCalibrationState,
    manual: bool,
    store: Box<dyn CalibrationStore>,
}

impl std::fmt::Debug for HeadingCalibrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadingCalibrationEngine")
            .field("params", &self.params)
            .field("state", &self.state)
            .field("manual", &self.manual)
            .finish()
    }
}

impl HeadingCalibrationEngine {
    /// Build an engine, restoring any persisted offset from `store`.
    ///
    /// A restored offset is held exactly like a manual override: both
    /// phases stay off until [`clear_override`](Self::clear_override).
    pub fn new(params: CalibrationParams, store: Box<dyn CalibrationStore>) -> Self {
        let mut state = HeadingCalibrationState::default();
        let mut manual = false;
        match store.load() {
            Ok(Some(offset)) if offset.is_finite() => {
                state.offset_rad = wrap_pi(offset);
                state.fast_lock_complete = true;
                state.sample_count = params.max_samples;
                manual = true;
                info!(offset_deg = offset.to_degrees(), "restored heading calibration");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not load heading calibration; starting from zero"),
        }
        Self {
            params,
            state,
            manual,
            store,
        }
    }

    pub fn offset_rad(&self) -> f64 {
        self.state.offset_rad
    }

    pub fn state(&self) -> HeadingCalibrationState {
        self.state
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(self.state.offset_rad) {
            warn!(error = %e, "failed to persist heading calibration");
        }
    }

    /// Feed one sample.
    ///
    /// `reported_heading` is the heading (radians, compass) the model would
    /// render without calibration; `motion_heading` is the travel bearing.
    pub fn observe(
        &mut self,
        reported_heading: f64,
        motion_heading: Option<f64>,
        speed_mps: f64,
    ) -> CalibrationUpdate {
        let p = &self.params;
        let Some(motion) = motion_heading else {
            return CalibrationUpdate::Idle;
        };
        if self.manual
            || speed_mps < p.min_speed_mps
            || self.state.sample_count >= p.max_samples
            || !reported_heading.is_finite()
            || !motion.is_finite()
        {
            return CalibrationUpdate::Idle;
        }

        let error = shortest_delta(reported_heading + self.state.offset_rad, motion);
        if error.abs() > p.outlier_rad {
            debug!(error_deg = error.to_degrees(), "calibration outlier rejected");
            return CalibrationUpdate::Outlier { error_rad: error };
        }

        self.state.sample_count += 1;

        if !self.state.fast_lock_complete {
            let step = (error * p.fast_gain).clamp(-p.fast_clamp_rad, p.fast_clamp_rad);
            self.state.offset_rad = wrap_pi(self.state.offset_rad + step);
            if error.abs() <= p.aligned_rad {
                self.state.aligned_streak += 1;
            } else {
                self.state.aligned_streak = 0;
            }
            if self.state.aligned_streak >= p.fast_lock_streak
                || self.state.sample_count >= p.fast_lock_max_samples
            {
                self.state.fast_lock_complete = true;
                self.persist();
                info!(
                    offset_deg = self.state.offset_rad.to_degrees(),
                    samples = self.state.sample_count,
                    "heading calibration fast lock complete"
                );
                return CalibrationUpdate::FastLockComplete {
                    offset_rad: self.state.offset_rad,
                };
            }
        } else {
            let step = (error * p.trim_gain).clamp(-p.trim_clamp_rad, p.trim_clamp_rad);
            self.state.offset_rad = wrap_pi(self.state.offset_rad + step);
            if self.state.sample_count % p.persist_every == 0 {
                self.persist();
            }
        }

        CalibrationUpdate::Adjusted {
            offset_rad: self.state.offset_rad,
            error_rad: error,
        }
    }

    /// Pin the offset manually.  Non-finite input is ignored.
    ///
    /// Returns the offset in effect after the call.
    pub fn set_offset(&mut self, offset_rad: f64) -> f64 {
        if !offset_rad.is_finite() {
            return self.state.offset_rad;
        }
        self.state.offset_rad = wrap_pi(offset_rad);
        self.state.fast_lock_complete = true;
        self.state.sample_count = self.params.max_samples;
        self.state.aligned_streak = 0;
        self.manual = true;
        self.persist();
        info!(offset_deg = self.state.offset_rad.to_degrees(), "heading calibration pinned");
        self.state.offset_rad
    }

    /// Forget the stored offset and restart automatic calibration from zero.
    pub fn clear_override(&mut self) -> Result<(), StriderError> {
        self.store.clear()?;
        self.state = HeadingCalibrationState::default();
        self.manual = false;
        Ok(())
    }
}
