//! Perception capture scheduler.
//!
//! Turns timer ticks into outbound perception reports:
//!
//! | Report | Trigger | Guard |
//! |---|---|---|
//! | `camera_frame` | camera tick (≈2.3 s) | live channel, single flight |
//! | `terrain_probe` | probe tick (≈1.5 s) | live channel, single flight |
//! | `dynamic_obstacles` | caller | live channel, ≥160 ms between sends |
//!
//! Camera and probe work runs in spawned tasks so the update path never
//! waits on the renderer or the scene.  A tick that finds its previous task
//! still running is skipped, not queued.  Completions are reported back on
//! an unbounded channel for metrics and status notices.
//!
//! Capture providers are awaited without a timeout.  A provider that never
//! resolves keeps the camera slot busy until [`PerceptionScheduler::stop`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use strider_hal::capture::{CaptureContext, CaptureOutcome, CaptureProvider};
use strider_perception::geo::offset_fix;
use strider_perception::terrain::{TerrainConfig, TerrainQuery, sample_height};
use strider_types::{
    CameraFrameReport, DynamicObstacle, DynamicObstaclesReport, GeoFix, OutboundMessage,
    RobotTelemetry, StriderError, TerrainProbeReport, TerrainSample,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub camera_interval: Duration,
    pub terrain_probe_interval: Duration,
    pub obstacle_min_interval: Duration,
    /// Minimum spacing of capture failure and dark-frame notices.
    pub status_cooldown: Duration,
    /// Probe bearings relative to the robot heading (degrees).
    pub probe_bearings_deg: Vec<f64>,
    pub probe_distances_m: Vec<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            camera_interval: Duration::from_millis(2300),
            terrain_probe_interval: Duration::from_millis(1500),
            obstacle_min_interval: Duration::from_millis(160),
            status_cooldown: Duration::from_secs(6),
            probe_bearings_deg: vec![-60.0, -40.0, -20.0, -10.0, 0.0, 10.0, 20.0, 40.0, 60.0],
            probe_distances_m: vec![1.5, 3.0, 5.0, 7.0],
        }
    }
}

fn cooldown(period: Duration) -> DefaultDirectRateLimiter {
    let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
    RateLimiter::direct(quota)
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    /// Previous capture of this kind still in flight.
    Busy,
    Offline,
    /// No composed pose yet.
    NoPose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleOutcome {
    Sent { count: usize },
    /// Nothing valid to send.
    Empty,
    RateLimited,
    Offline,
    /// Outbound queue full.
    Dropped,
}

/// Reported back from a finished capture task.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureDone {
    Camera {
        result: Result<CameraResult, StriderError>,
        latency: Duration,
    },
    Probe {
        samples: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraResult {
    Sent,
    Dark,
    Skipped,
}

// ─────────────────────────────────────────────────────────────────────────────
// Terrain fan
// ─────────────────────────────────────────────────────────────────────────────

/// Sample the probe fan around `robot`.  Points without a plausible height
/// are left out.
pub async fn probe_fan(
    terrain: &dyn TerrainQuery,
    terrain_config: &TerrainConfig,
    robot: &RobotTelemetry,
    base_height_m: f64,
    bearings_deg: &[f64],
    distances_m: &[f64],
) -> Vec<TerrainSample> {
    let origin = GeoFix::new(robot.lat, robot.lon);
    let mut samples = Vec::with_capacity(bearings_deg.len() * distances_m.len());
    for &bearing_deg in bearings_deg {
        let bearing = (robot.heading_deg + bearing_deg).to_radians();
        for &distance_m in distances_m {
            let fix = offset_fix(origin, bearing, distance_m);
            if let Some(height_m) = sample_height(terrain, fix, terrain_config).await {
                samples.push(TerrainSample {
                    bearing_deg,
                    distance_m,
                    height_m,
                    delta_m: height_m - base_height_m,
                });
            }
        }
    }
    samples
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct PerceptionScheduler {
    config: SchedulerConfig,
    capture: Arc<dyn CaptureProvider>,
    terrain: Arc<dyn TerrainQuery>,
    terrain_config: TerrainConfig,
    outbound: mpsc::Sender<OutboundMessage>,
    done: mpsc::UnboundedSender<CaptureDone>,
    camera_task: Option<JoinHandle<()>>,
    probe_task: Option<JoinHandle<()>>,
    /// Advanced only when a probe report is actually sent.
    probe_seq: Arc<AtomicU64>,
    obstacle_seq: u64,
    obstacle_limiter: DefaultDirectRateLimiter,
    failure_notice: DefaultDirectRateLimiter,
    dark_notice: DefaultDirectRateLimiter,
}

fn in_flight(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|t| !t.is_finished())
}

impl PerceptionScheduler {
    pub fn new(
        config: SchedulerConfig,
        capture: Arc<dyn CaptureProvider>,
        terrain: Arc<dyn TerrainQuery>,
        terrain_config: TerrainConfig,
        outbound: mpsc::Sender<OutboundMessage>,
        done: mpsc::UnboundedSender<CaptureDone>,
    ) -> Self {
        Self {
            obstacle_limiter: cooldown(config.obstacle_min_interval),
            failure_notice: cooldown(config.status_cooldown),
            dark_notice: cooldown(config.status_cooldown),
            config,
            capture,
            terrain,
            terrain_config,
            outbound,
            done,
            camera_task: None,
            probe_task: None,
            probe_seq: Arc::new(AtomicU64::new(0)),
            obstacle_seq: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn camera_in_flight(&self) -> bool {
        in_flight(&self.camera_task)
    }

    pub fn probe_in_flight(&self) -> bool {
        in_flight(&self.probe_task)
    }

    pub fn tick_camera(&mut self, live: bool, ctx: Option<CaptureContext>) -> TickOutcome {
        if !live {
            return TickOutcome::Offline;
        }
        if self.camera_in_flight() {
            debug!("camera capture still pending; tick skipped");
            return TickOutcome::Busy;
        }
        let Some(ctx) = ctx else {
            return TickOutcome::NoPose;
        };

        let capture = self.capture.clone();
        let outbound = self.outbound.clone();
        let done = self.done.clone();
        self.camera_task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result = match capture.capture(&ctx).await {
                Ok(CaptureOutcome::Frame(bytes)) => {
                    let msg = OutboundMessage::CameraFrame(CameraFrameReport {
                        image: BASE64.encode(&bytes),
                        captured_at_ms: Utc::now().timestamp_millis(),
                        robot: ctx.telemetry,
                    });
                    match outbound.send(msg).await {
                        Ok(()) => Ok(CameraResult::Sent),
                        Err(_) => Err(StriderError::Channel("outbound queue closed".into())),
                    }
                }
                Ok(CaptureOutcome::Dark { .. }) => Ok(CameraResult::Dark),
                Ok(CaptureOutcome::Skipped) => Ok(CameraResult::Skipped),
                Err(e) => Err(e),
            };
            let _ = done.send(CaptureDone::Camera {
                result,
                latency: started.elapsed(),
            });
        }));
        TickOutcome::Started
    }

    pub fn tick_probe(&mut self, live: bool, robot: Option<RobotTelemetry>, base_height_m: f64) -> TickOutcome {
        if !live {
            return TickOutcome::Offline;
        }
        if self.probe_in_flight() {
            return TickOutcome::Busy;
        }
        let Some(robot) = robot else {
            return TickOutcome::NoPose;
        };

        let probe_seq = self.probe_seq.clone();
        let terrain = self.terrain.clone();
        let terrain_config = self.terrain_config.clone();
        let bearings = self.config.probe_bearings_deg.clone();
        let distances = self.config.probe_distances_m.clone();
        let outbound = self.outbound.clone();
        let done = self.done.clone();
        self.probe_task = Some(tokio::spawn(async move {
            let samples = probe_fan(
                terrain.as_ref(),
                &terrain_config,
                &robot,
                base_height_m,
                &bearings,
                &distances,
            )
            .await;
            let count = samples.len();
            if count > 0 {
                let seq = probe_seq.fetch_add(1, Ordering::Relaxed) + 1;
                let msg = OutboundMessage::TerrainProbe(TerrainProbeReport {
                    seq,
                    captured_at_ms: Utc::now().timestamp_millis(),
                    base_height_m,
                    samples,
                    robot,
                });
                if outbound.send(msg).await.is_err() {
                    warn!(seq, "terrain probe dropped: outbound queue closed");
                }
            } else {
                debug!("terrain probe resolved no samples");
            }
            let _ = done.send(CaptureDone::Probe { samples: count });
        }));
        TickOutcome::Started
    }

    /// Validate and send a batch of client-side obstacles.
    pub fn report_obstacles(&mut self, live: bool, candidates: Vec<DynamicObstacle>) -> ObstacleOutcome {
        if !live {
            return ObstacleOutcome::Offline;
        }
        let obstacles: Vec<_> = candidates.into_iter().filter(DynamicObstacle::is_valid).collect();
        if obstacles.is_empty() {
            return ObstacleOutcome::Empty;
        }
        if self.obstacle_limiter.check().is_err() {
            return ObstacleOutcome::RateLimited;
        }
        self.obstacle_seq += 1;
        let count = obstacles.len();
        let msg = OutboundMessage::DynamicObstacles(DynamicObstaclesReport {
            seq: self.obstacle_seq,
            captured_at_ms: Utc::now().timestamp_millis(),
            obstacles,
        });
        match self.outbound.try_send(msg) {
            Ok(()) => ObstacleOutcome::Sent { count },
            Err(_) => ObstacleOutcome::Dropped,
        }
    }

    /// Status line for a finished capture, subject to the notice cooldowns.
    pub fn notice_for(&self, done: &CaptureDone) -> Option<String> {
        match done {
            CaptureDone::Camera { result: Err(e), .. } => self
                .failure_notice
                .check()
                .is_ok()
                .then(|| format!("camera capture failed: {e}")),
            CaptureDone::Camera {
                result: Ok(CameraResult::Dark),
                ..
            } => self
                .dark_notice
                .check()
                .is_ok()
                .then(|| "camera warming up: frame too dark, retrying".to_string()),
            _ => None,
        }
    }

    /// Cancel any in-flight capture.  Dropping the capture future restores a
    /// temporarily repointed render camera.
    pub fn stop(&mut self) {
        for task in [self.camera_task.take(), self.probe_task.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Drop for PerceptionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
