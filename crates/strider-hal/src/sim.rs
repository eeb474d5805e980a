//! In-process stand-ins for the renderer and the scene's terrain queries.
//!
//! [`SimRenderRig`] and [`SimTerrain`] let the full client run headless, in
//! CI and from the `strider` binary, without a 3-D engine attached.
//!
//! # Example
//!
//! ```rust
//! use strider_hal::sim::SimTerrain;
//! use strider_types::GeoFix;
//!
//! let terrain = SimTerrain::flat(GeoFix::new(-33.8568, 151.2153), 12.0);
//! assert_eq!(terrain.height_at(GeoFix::new(-33.8568, 151.2153)), 12.0);
//! ```

use std::f64::consts::TAU;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use strider_perception::geo::{EARTH_RADIUS_M, arc_delta_deg};
use strider_perception::terrain::TerrainQuery;
use strider_types::{GeoFix, StriderError};

use crate::camera::CameraFrame;
use crate::rig::{CameraPose, RenderRig};

// ────────────────────────────────────────────────────────────────────────────
// Render rig
// ────────────────────────────────────────────────────────────────────────────

/// A renderer that produces a heading-dependent gradient after a number of
/// black warm-up frames, and encodes frames as binary PPM.
pub struct SimRenderRig {
    camera: Mutex<CameraPose>,
    placements: Mutex<Vec<CameraPose>>,
    rendered: AtomicU64,
    warmup_frames: u64,
    width: u32,
    height: u32,
    frame_interval: Duration,
}

impl SimRenderRig {
    pub fn new(camera: CameraPose) -> Self {
        Self {
            camera: Mutex::new(camera),
            placements: Mutex::new(Vec::new()),
            rendered: AtomicU64::new(0),
            warmup_frames: 0,
            width: 32,
            height: 24,
            frame_interval: Duration::from_millis(16),
        }
    }

    /// Number of initial render passes that come back black.
    pub fn with_warmup_frames(mut self, frames: u64) -> Self {
        self.warmup_frames = frames;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Camera placement seen by every render pass so far.
    pub fn placements(&self) -> Vec<CameraPose> {
        self.placements.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn draw(&self, pose: CameraPose, black: bool) -> CameraFrame {
        let (w, h) = (self.width, self.height);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        let tint = (pose.heading_rad.rem_euclid(TAU) / TAU * 255.0) as u8;
        for y in 0..h {
            for x in 0..w {
                if black {
                    data.extend_from_slice(&[0, 0, 0]);
                } else {
                    data.push((x * 255 / w.max(1)) as u8);
                    data.push((y * 255 / h.max(1)) as u8);
                    data.push(tint);
                }
            }
        }
        CameraFrame::new(w, h, data)
    }
}

#[async_trait]
impl RenderRig for SimRenderRig {
    fn camera(&self) -> CameraPose {
        *self.camera.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_camera(&self, pose: CameraPose) {
        *self.camera.lock().unwrap_or_else(|e| e.into_inner()) = pose;
    }

    async fn render_pass(&self) -> Result<CameraFrame, StriderError> {
        tokio::time::sleep(self.frame_interval).await;
        let pose = self.camera();
        self.placements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(pose);
        let n = self.rendered.fetch_add(1, Ordering::Relaxed);
        Ok(self.draw(pose, n < self.warmup_frames))
    }

    fn encode(&self, frame: &CameraFrame) -> Result<Vec<u8>, StriderError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() != expected {
            return Err(StriderError::Capture(format!(
                "frame is {} bytes, expected {expected}",
                frame.data.len()
            )));
        }
        let mut out = format!("P6\n{} {}\n255\n", frame.width, frame.height).into_bytes();
        out.extend_from_slice(&frame.data);
        Ok(out)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Terrain
// ────────────────────────────────────────────────────────────────────────────

/// Rolling hills around an origin.  The visible surface sits a few
/// centimetres above the base elevation, like grass over a height map.
#[derive(Debug)]
pub struct SimTerrain {
    origin: GeoFix,
    base_m: f64,
    amplitude_m: f64,
    wavelength_m: f64,
    surface_offset_m: f64,
    queries: AtomicU64,
}

impl SimTerrain {
    pub fn new(origin: GeoFix, base_m: f64, amplitude_m: f64, wavelength_m: f64) -> Self {
        Self {
            origin,
            base_m,
            amplitude_m,
            wavelength_m: wavelength_m.max(1.0),
            surface_offset_m: 0.05,
            queries: AtomicU64::new(0),
        }
    }

    pub fn flat(origin: GeoFix, base_m: f64) -> Self {
        let mut t = Self::new(origin, base_m, 0.0, 1.0);
        t.surface_offset_m = 0.0;
        t
    }

    /// Base elevation at `fix`.
    pub fn height_at(&self, fix: GeoFix) -> f64 {
        let (east, north) = arc_delta_deg(self.origin, fix);
        let to_m = |deg: f64| deg.to_radians() * EARTH_RADIUS_M;
        let k = TAU / self.wavelength_m;
        self.base_m + self.amplitude_m * (to_m(north) * k).sin() * (to_m(east) * k).cos()
    }

    /// Total base + surface queries served.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TerrainQuery for SimTerrain {
    async fn base_height(&self, fix: GeoFix) -> Result<Option<f64>, StriderError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !fix.is_finite() {
            return Err(StriderError::Terrain("non-finite fix".into()));
        }
        Ok(Some(self.height_at(fix)))
    }

    async fn surface_height(&self, fix: GeoFix) -> Result<Option<f64>, StriderError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !fix.is_finite() {
            return Err(StriderError::Terrain("non-finite fix".into()));
        }
        Ok(Some(self.height_at(fix) + self.surface_offset_m))
    }
}
