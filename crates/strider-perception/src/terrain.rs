//! Terrain height estimation.
//!
//! The scene exposes two independent elevation sources through
//! [`TerrainQuery`]: a coarse base elevation (terrain mesh only) and a finer
//! visible-surface elevation (buildings, bridges, stairs).  The
//! [`TerrainHeightEstimator`] picks between them, rejects implausible values,
//! throttles resampling and smooths the result so the robot neither jitters
//! nor sinks into the ground.
//!
//! # Smoothing
//!
//! | Jump from cached value | Policy |
//! |---|---|
//! | `> snap_threshold_m` | snap immediately (real discontinuity) |
//! | `> fast_blend_threshold_m` | blend at `fast_blend` |
//! | otherwise | blend at `slow_blend` |

use async_trait::async_trait;
use strider_types::{GeoFix, StriderError};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Query adapter
// ────────────────────────────────────────────────────────────────────────────

/// Height queries answered by the 3-D scene.
///
/// `Ok(None)` means the source has nothing loaded at that position; `Err`
/// means the query itself failed.  Both are treated as "no sample".
#[async_trait]
pub trait TerrainQuery: Send + Sync {
    /// Coarse terrain-mesh elevation (metres above the reference surface).
    async fn base_height(&self, fix: GeoFix) -> Result<Option<f64>, StriderError>;

    /// Fine visible-surface elevation, including structures.
    async fn surface_height(&self, fix: GeoFix) -> Result<Option<f64>, StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration / state
// ────────────────────────────────────────────────────────────────────────────

/// Tuning for [`TerrainHeightEstimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainConfig {
    /// Minimum spacing between samples while moving.
    pub min_resample_interval_ms: u64,
    /// Minimum spacing between samples while stationary.
    pub stationary_resample_interval_ms: u64,
    /// Position change (degrees) under which the robot counts as stationary.
    pub stationary_epsilon_deg: f64,
    pub snap_threshold_m: f64,
    pub fast_blend_threshold_m: f64,
    pub fast_blend: f64,
    pub slow_blend: f64,
    /// Samples with an absolute value above this are discarded.
    pub max_abs_height_m: f64,
    /// How far the surface sample may sit below the base sample before the
    /// surface is considered to have hit a hole.
    pub surface_hole_margin_m: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            min_resample_interval_ms: 300,
            stationary_resample_interval_ms: 1200,
            stationary_epsilon_deg: 1e-8,
            snap_threshold_m: 12.0,
            fast_blend_threshold_m: 1.0,
            fast_blend: 0.75,
            slow_blend: 0.5,
            max_abs_height_m: 9000.0,
            surface_hole_margin_m: 1.5,
        }
    }
}

/// Cached height owned by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TerrainHeightState {
    pub value: f64,
    pub valid: bool,
    pub last_sample_time_ms: Option<u64>,
}

/// Result of [`TerrainHeightEstimator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainResolution {
    /// Height to use this frame (0 until the first valid sample).
    pub height_m: f64,
    /// `true` when the scene was queried this call.
    pub sampled: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Source selection
// ────────────────────────────────────────────────────────────────────────────

fn plausible(v: Option<f64>, max_abs: f64) -> Option<f64> {
    v.filter(|h| h.is_finite() && h.abs() <= max_abs)
}

/// Choose between a coarse and a fine elevation sample.
///
/// The surface wins unless it sits more than `hole_margin_m` below the base,
/// which usually means the ray slipped through a gap or an excluded mesh.
pub fn prefer_surface(base: Option<f64>, surface: Option<f64>, hole_margin_m: f64) -> Option<f64> {
    match (base, surface) {
        (Some(b), Some(s)) if s < b - hole_margin_m => Some(b),
        (_, Some(s)) => Some(s),
        (Some(b), None) => Some(b),
        (None, None) => None,
    }
}

/// Query both sources at `fix` and return the preferred plausible height.
pub async fn sample_height(
    query: &dyn TerrainQuery,
    fix: GeoFix,
    config: &TerrainConfig,
) -> Option<f64> {
    let base = match query.base_height(fix).await {
        Ok(v) => plausible(v, config.max_abs_height_m),
        Err(e) => {
            debug!(error = %e, "base height query failed");
            None
        }
    };
    let surface = match query.surface_height(fix).await {
        Ok(v) => plausible(v, config.max_abs_height_m),
        Err(e) => {
            debug!(error = %e, "surface height query failed");
            None
        }
    };
    prefer_surface(base, surface, config.surface_hole_margin_m)
}

// ────────────────────────────────────────────────────────────────────────────
// Estimator
// ────────────────────────────────────────────────────────────────────────────

/// Smoothed, throttled terrain height for the robot's current fix.
#[derive(Debug, Clone, Default)]
pub struct TerrainHeightEstimator {
    config: TerrainConfig,
    state: TerrainHeightState,
    last_fix: Option<GeoFix>,
}

impl TerrainHeightEstimator {
    pub fn new(config: TerrainConfig) -> Self {
        Self {
            config,
            state: TerrainHeightState::default(),
            last_fix: None,
        }
    }

    pub fn state(&self) -> TerrainHeightState {
        self.state
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Current height, or 0 before the first valid sample.
    pub fn height_m(&self) -> f64 {
        if self.state.valid { self.state.value } else { 0.0 }
    }

    fn is_stationary(&self, fix: GeoFix) -> bool {
        self.last_fix.is_some_and(|prev| {
            (prev.lat - fix.lat).abs() <= self.config.stationary_epsilon_deg
                && (prev.lon - fix.lon).abs() <= self.config.stationary_epsilon_deg
        })
    }

    /// `true` if a sample is due at `now_ms` for a robot at `fix`.
    pub fn needs_sample(&self, fix: GeoFix, now_ms: u64) -> bool {
        if !self.state.valid {
            return true;
        }
        let Some(last) = self.state.last_sample_time_ms else {
            return true;
        };
        let interval = if self.is_stationary(fix) {
            self.config.stationary_resample_interval_ms
        } else {
            self.config.min_resample_interval_ms
        };
        now_ms.saturating_sub(last) >= interval
    }

    /// Fold one raw sample into the cache, returning the new value.
    ///
    /// `None` or implausible samples leave the cache untouched.
    pub fn ingest_sample(&mut self, sample: Option<f64>, now_ms: u64) -> f64 {
        self.state.last_sample_time_ms = Some(now_ms);
        let Some(sample) = plausible(sample, self.config.max_abs_height_m) else {
            return self.height_m();
        };
        if !self.state.valid {
            self.state.value = sample;
            self.state.valid = true;
            return sample;
        }
        let delta = sample - self.state.value;
        let cfg = &self.config;
        self.state.value = if delta.abs() > cfg.snap_threshold_m {
            sample
        } else if delta.abs() > cfg.fast_blend_threshold_m {
            self.state.value + delta * cfg.fast_blend
        } else {
            self.state.value + delta * cfg.slow_blend
        };
        self.state.value
    }

    /// Resolve the height at `fix`, sampling the scene only when due.
    pub async fn resolve(
        &mut self,
        fix: GeoFix,
        now_ms: u64,
        query: &dyn TerrainQuery,
    ) -> TerrainResolution {
        let due = self.needs_sample(fix, now_ms);
        self.last_fix = Some(fix);
        if !due {
            return TerrainResolution {
                height_m: self.height_m(),
                sampled: false,
            };
        }
        let sample = sample_height(query, fix, &self.config).await;
        TerrainResolution {
            height_m: self.ingest_sample(sample, now_ms),
            sampled: true,
        }
    }
}
