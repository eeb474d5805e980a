//! Camera capture strategies.
//!
//! [`CaptureProvider`] is the single capability the scheduler depends on.
//! Two implementations exist:
//!
//! | Provider | Source of the image |
//! |---|---|
//! | [`RigCapture`] | repoints the shared [`RenderRig`] camera for one pass |
//! | [`CallbackCapture`] | an externally supplied async callback |
//!
//! Providers return already-encoded image bytes.  Neither carries a
//! timeout: a provider that never resolves holds its caller's single-flight
//! slot until the caller is torn down.

use std::f64::consts::FRAC_PI_2;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use strider_perception::geo::offset_fix;
use strider_perception::transform::Transform3D;
use strider_types::{GeoFix, RobotTelemetry, StriderError};
use tracing::{debug, instrument};

use crate::camera::DARK_LUMA_THRESHOLD;
use crate::rig::{CameraOverride, CameraPose, RenderRig};

/// What a capture needs to know about the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureContext {
    pub telemetry: RobotTelemetry,
    /// Local transform of the camera mount joint in the Y-up skeleton frame
    /// (x forward, y up, z right), if the skeleton has one.
    pub mount: Option<Transform3D>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Encoded image bytes.
    Frame(Vec<u8>),
    /// The renderer produced a near-black frame; retry next tick.
    Dark { luma: f64 },
    /// The provider declined to produce a frame.
    Skipped,
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture(&self, ctx: &CaptureContext) -> Result<CaptureOutcome, StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rig capture
// ────────────────────────────────────────────────────────────────────────────

/// Eye height used when the skeleton has no mount joint.
pub const FALLBACK_EYE_HEIGHT_M: f64 = 1.6;
pub const FALLBACK_EYE_FORWARD_M: f64 = 0.3;
/// Slight downward tilt of the first-person view.
pub const FIRST_PERSON_PITCH_RAD: f64 = -0.12;

/// First-person camera placement anchored to the mount joint, or to a
/// synthetic head position when there is none.
pub fn first_person_camera(ctx: &CaptureContext) -> CameraPose {
    let t = &ctx.telemetry;
    let heading = t.heading_deg.to_radians();
    let (forward, up, right) = match ctx.mount {
        Some(m) if m.translation.is_finite() => (m.translation.x, m.translation.y, m.translation.z),
        _ => (FALLBACK_EYE_FORWARD_M, FALLBACK_EYE_HEIGHT_M, 0.0),
    };
    let ahead = offset_fix(GeoFix::new(t.lat, t.lon), heading, forward);
    CameraPose {
        fix: offset_fix(ahead, heading + FRAC_PI_2, right),
        height_m: t.height_m + up,
        heading_rad: heading,
        pitch_rad: FIRST_PERSON_PITCH_RAD,
    }
}

/// Captures through the shared render camera.
pub struct RigCapture {
    rig: Arc<dyn RenderRig>,
    dark_threshold: f64,
}

impl RigCapture {
    pub fn new(rig: Arc<dyn RenderRig>) -> Self {
        Self {
            rig,
            dark_threshold: DARK_LUMA_THRESHOLD,
        }
    }

    pub fn with_dark_threshold(mut self, threshold: f64) -> Self {
        self.dark_threshold = threshold;
        self
    }
}

#[async_trait]
impl CaptureProvider for RigCapture {
    #[instrument(skip_all, name = "rig_capture")]
    async fn capture(&self, ctx: &CaptureContext) -> Result<CaptureOutcome, StriderError> {
        let _override = CameraOverride::acquire(self.rig.clone(), first_person_camera(ctx));
        let frame = self.rig.render_pass().await?;
        let luma = frame.average_luma();
        if luma < self.dark_threshold {
            debug!(luma, "near-black frame discarded");
            return Ok(CaptureOutcome::Dark { luma });
        }
        Ok(CaptureOutcome::Frame(self.rig.encode(&frame)?))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// External callback
// ────────────────────────────────────────────────────────────────────────────

pub type CaptureCallback = Arc<
    dyn Fn(CaptureContext) -> BoxFuture<'static, Result<Option<Vec<u8>>, StriderError>> + Send + Sync,
>;

/// Delegates to a caller-supplied async function.  `Ok(None)` from the
/// callback maps to [`CaptureOutcome::Skipped`].
pub struct CallbackCapture {
    callback: CaptureCallback,
}

impl CallbackCapture {
    pub fn new(callback: CaptureCallback) -> Self {
        Self { callback }
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(CaptureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Vec<u8>>, StriderError>> + Send + 'static,
    {
        Self::new(Arc::new(move |ctx| f(ctx).boxed()))
    }
}

#[async_trait]
impl CaptureProvider for CallbackCapture {
    async fn capture(&self, ctx: &CaptureContext) -> Result<CaptureOutcome, StriderError> {
        Ok(match (self.callback)(ctx.clone()).await? {
            Some(bytes) if !bytes.is_empty() => CaptureOutcome::Frame(bytes),
            _ => CaptureOutcome::Skipped,
        })
    }
}
