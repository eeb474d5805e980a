//! The shared render camera and a scoped override over it.
//!
//! The renderer has a single camera used for the operator view.  Capturing a
//! first-person frame means pointing that camera somewhere else for one
//! render pass.  [`CameraOverride`] records the current placement on
//! acquisition and puts it back when dropped, so early returns, errors and
//! task cancellation all restore the operator view.

use std::sync::Arc;

use async_trait::async_trait;
use strider_types::{GeoFix, StriderError};
use tracing::trace;

use crate::camera::CameraFrame;

/// Placement of the render camera in world terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub fix: GeoFix,
    pub height_m: f64,
    /// Compass heading, clockwise from north (radians).
    pub heading_rad: f64,
    /// Positive looks up.
    pub pitch_rad: f64,
}

/// External renderer boundary.
#[async_trait]
pub trait RenderRig: Send + Sync {
    fn camera(&self) -> CameraPose;
    fn set_camera(&self, pose: CameraPose);
    /// Wait for the next render pass and read back the frame.
    async fn render_pass(&self) -> Result<CameraFrame, StriderError>;
    /// Compress a frame for the wire (e.g. JPEG).
    fn encode(&self, frame: &CameraFrame) -> Result<Vec<u8>, StriderError>;
}

/// Holds the rig's camera at an overridden pose until dropped.
pub struct CameraOverride {
    rig: Arc<dyn RenderRig>,
    saved: CameraPose,
}

impl CameraOverride {
    pub fn acquire(rig: Arc<dyn RenderRig>, pose: CameraPose) -> Self {
        let saved = rig.camera();
        rig.set_camera(pose);
        trace!(?pose, "render camera overridden");
        Self { rig, saved }
    }

    pub fn saved(&self) -> CameraPose {
        self.saved
    }
}

impl Drop for CameraOverride {
    fn drop(&mut self) {
        self.rig.set_camera(self.saved);
        trace!("render camera restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRenderRig;

    fn pose(heading_rad: f64) -> CameraPose {
        CameraPose {
            fix: GeoFix::new(1.0, 2.0),
            height_m: 1.5,
            heading_rad,
            pitch_rad: 0.0,
        }
    }

    #[test]
    fn override_restores_on_drop() {
        let rig = Arc::new(SimRenderRig::new(pose(0.0)));
        {
            let guard = CameraOverride::acquire(rig.clone(), pose(1.0));
            assert_eq!(guard.saved(), pose(0.0));
            assert_eq!(rig.camera(), pose(1.0));
        }
        assert_eq!(rig.camera(), pose(0.0));
    }

    #[tokio::test]
    async fn override_restores_when_task_is_cancelled() {
        let rig = Arc::new(SimRenderRig::new(pose(0.0)));
        let held = rig.clone();
        let task = tokio::spawn(async move {
            let _guard = CameraOverride::acquire(held, pose(2.0));
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        while rig.camera() != pose(2.0) {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(rig.camera(), pose(0.0));
    }
}
