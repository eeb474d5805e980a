//! Robot telemetry client.
//!
//! [`RobotClient`] wires the connection, the pose pipeline and the capture
//! scheduler into one tokio task.  All estimator state is owned by that task
//! and touched only from its `select!` loop, so none of it needs locking:
//!
//! ```text
//!  ConnectionManager ──latest pose──▶ render tick ─▶ PoseIngest
//!         │                                            │ apply
//!         │ events                                     ▼
//!         ▼                         SpatialPoseComposer ─▶ LinkRetargeter
//!   live / offline ─▶ PerceptionScheduler ◀── camera / probe ticks
//!                              │
//!                              └──outbound──▶ ConnectionManager
//! ```
//!
//! Callers observe the client through [`ClientHandle`]: an event stream of
//! state changes and status lines, a `watch` slot with the latest applied
//! frame, and a small command surface (calibration override, obstacle
//! reports, shutdown).

use std::sync::Arc;
use std::time::Duration;

use strider_hal::capture::{CaptureContext, CaptureProvider};
use strider_middleware::{ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Dialer};
use strider_perception::calibration::{CalibrationParams, CalibrationUpdate, HeadingCalibrationEngine};
use strider_perception::composer::{ComposerConfig, RenderPose, SpatialPoseComposer};
use strider_perception::retarget::{JointMap, LinkRetargeter, RetargetReport};
use strider_perception::terrain::{TerrainConfig, TerrainHeightEstimator, TerrainQuery};
use strider_perception::transform::Transform3D;
use strider_types::{CalibrationStore, DynamicObstacle, NavigationContext, PosePayload, StriderError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::ingest::{IngestDecision, PoseIngest};
use crate::metrics::RuntimeMetrics;
use crate::scheduler::{CameraResult, CaptureDone, ObstacleOutcome, PerceptionScheduler, SchedulerConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level tuning for a [`RobotClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RobotClientConfig {
    pub connection: ConnectionConfig,
    /// Minimum spacing between two applied pose frames.
    pub min_apply_interval: Duration,
    /// Render tick period.
    pub tick: Duration,
    pub composer: ComposerConfig,
    pub terrain: TerrainConfig,
    pub calibration: CalibrationParams,
    pub scheduler: SchedulerConfig,
    /// Multiplier applied to link translations before the plausibility check.
    pub link_scale: f64,
    /// Skeleton joint the first-person camera is anchored to.
    pub mount_joint: String,
    pub metrics_window: Duration,
}

impl Default for RobotClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_apply_interval: Duration::from_millis(33),
            tick: Duration::from_millis(16),
            composer: ComposerConfig::default(),
            terrain: TerrainConfig::default(),
            calibration: CalibrationParams::default(),
            scheduler: SchedulerConfig::default(),
            link_scale: 1.0,
            mount_joint: "head".to_string(),
            metrics_window: Duration::from_secs(5),
        }
    }
}

/// External collaborators, injected at construction.
pub struct ClientDeps {
    pub dialer: Arc<dyn Dialer>,
    pub terrain: Arc<dyn TerrainQuery>,
    pub capture: Arc<dyn CaptureProvider>,
    pub calibration_store: Box<dyn CalibrationStore>,
    pub joint_map: JointMap,
}

// ─────────────────────────────────────────────────────────────────────────────
// Observable state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State(ConnectionState),
    /// Server status, capture notices, calibration announcements, `[perf]`.
    Status(String),
}

/// Snapshot published after every applied pose frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    /// Simulator timestamp of the applied frame.
    pub t: f64,
    pub pose: RenderPose,
    /// Render transform of `pose`: height on +Z, calibrated orientation.
    pub transform: Transform3D,
    /// Compass heading derived from motion (radians), if moving.
    pub motion_heading: Option<f64>,
    pub speed_mps: f64,
    pub calibration: CalibrationUpdate,
    pub offset_rad: f64,
    pub nav: Option<NavigationContext>,
    pub retarget: RetargetReport,
    /// Frames applied since start.
    pub applied: u64,
}

enum ClientCommand {
    SetOffset(f64, oneshot::Sender<f64>),
    ClearOverride(oneshot::Sender<Result<(), StriderError>>),
    ReportObstacles(Vec<DynamicObstacle>, oneshot::Sender<ObstacleOutcome>),
    Shutdown,
}

/// Caller's side of a running [`RobotClient`].
pub struct ClientHandle {
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub frames: watch::Receiver<Option<FrameUpdate>>,
    commands: mpsc::Sender<ClientCommand>,
    task: JoinHandle<()>,
}

fn closed() -> StriderError {
    StriderError::Channel("client stopped".into())
}

impl ClientHandle {
    /// Override the heading offset.  Returns the offset now in effect; a
    /// non-finite input leaves the previous offset in place.
    pub async fn set_offset(&self, offset_rad: f64) -> Result<f64, StriderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::SetOffset(offset_rad, tx))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Drop the stored offset and resume automatic calibration.
    pub async fn clear_override(&self) -> Result<(), StriderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::ClearOverride(tx))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn report_obstacles(&self, obstacles: Vec<DynamicObstacle>) -> Result<ObstacleOutcome, StriderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::ReportObstacles(obstacles, tx))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Cancel captures, close the channel and wait for the client task.
    pub async fn shutdown(self) {
        let _ = self.commands.send(ClientCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "client task ended abnormally");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct RobotClient {
    config: RobotClientConfig,
    connection: ConnectionHandle,
    terrain: Arc<dyn TerrainQuery>,
    composer: SpatialPoseComposer,
    retargeter: LinkRetargeter,
    ingest: PoseIngest,
    scheduler: PerceptionScheduler,
    metrics: RuntimeMetrics,
    live: bool,
    epoch: Instant,
    events: mpsc::UnboundedSender<ClientEvent>,
    frames: watch::Sender<Option<FrameUpdate>>,
    done: mpsc::UnboundedReceiver<CaptureDone>,
    commands: mpsc::Receiver<ClientCommand>,
}

impl RobotClient {
    /// Start connecting and spawn the client loop on the current runtime.
    pub fn spawn(config: RobotClientConfig, deps: ClientDeps) -> ClientHandle {
        let connection = ConnectionManager::spawn(config.connection.clone(), deps.dialer);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let calibration = HeadingCalibrationEngine::new(config.calibration.clone(), deps.calibration_store);
        let composer = SpatialPoseComposer::new(
            config.composer.clone(),
            TerrainHeightEstimator::new(config.terrain.clone()),
            calibration,
        );
        let scheduler = PerceptionScheduler::new(
            config.scheduler.clone(),
            deps.capture,
            deps.terrain.clone(),
            config.terrain.clone(),
            connection.outbound.clone(),
            done_tx,
        );
        let now = Instant::now();

        let client = Self {
            retargeter: LinkRetargeter::new(deps.joint_map, config.link_scale),
            ingest: PoseIngest::new(config.min_apply_interval),
            metrics: RuntimeMetrics::new(config.metrics_window, now),
            terrain: deps.terrain,
            connection,
            composer,
            scheduler,
            live: false,
            epoch: now,
            events: events_tx,
            frames: frames_tx,
            done: done_rx,
            commands: cmd_rx,
            config,
        };
        let task = tokio::spawn(client.run());

        ClientHandle {
            events: events_rx,
            frames: frames_rx,
            commands: cmd_tx,
            task,
        }
    }

    fn status(&self, line: impl Into<String>) {
        let _ = self.events.send(ClientEvent::Status(line.into()));
    }

    #[instrument(skip_all, name = "robot_client")]
    async fn run(mut self) {
        let mut render = interval(self.config.tick);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let camera_period = self.config.scheduler.camera_interval;
        let probe_period = self.config.scheduler.terrain_probe_interval;
        let mut camera = interval_at(Instant::now() + camera_period, camera_period);
        camera.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut probe = interval_at(Instant::now() + probe_period, probe_period);
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut perf = interval(self.config.metrics_window);
        perf.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.connection.events.recv() => match event {
                    Some(ConnectionEvent::State(state)) => {
                        self.live = state == ConnectionState::Live;
                        match state {
                            ConnectionState::Live => {
                                // Capture timers and the motion baseline
                                // restart with each session.
                                camera.reset();
                                probe.reset();
                                self.composer.restart_motion();
                            }
                            ConnectionState::Offline => self.scheduler.stop(),
                            ConnectionState::Connecting => {}
                        }
                        let _ = self.events.send(ClientEvent::State(state));
                    }
                    Some(ConnectionEvent::Status(line)) => self.status(line),
                    None => break,
                },
                _ = render.tick() => self.on_render_tick().await,
                _ = camera.tick(), if self.live => self.on_camera_tick(),
                _ = probe.tick(), if self.live => self.on_probe_tick(),
                Some(done) = self.done.recv() => self.on_capture_done(done),
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                _ = perf.tick() => self.on_perf_tick(),
            }
        }

        self.scheduler.stop();
        self.connection.shutdown().await;
        info!("robot client stopped");
    }

    async fn on_render_tick(&mut self) {
        let now = Instant::now();
        let latest = self.connection.latest.borrow().clone();
        if let IngestDecision::Apply(payload) = self.ingest.decide(latest.as_ref(), now) {
            self.ingest.commit(payload.t, now);
            self.apply(&payload, now).await;
        }
    }

    async fn apply(&mut self, payload: &PosePayload, now: Instant) {
        let now_ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let Some(frame) = self
            .composer
            .compose(payload.t, &payload.root, now_ms, self.terrain.as_ref())
            .await
        else {
            debug!(t = payload.t, "frame skipped: invalid root pose");
            return;
        };
        let retarget = self.retargeter.apply(&payload.links);

        self.metrics.pose_applied();
        if frame.terrain_sampled {
            self.metrics.terrain_queried(2);
        }
        if let CalibrationUpdate::FastLockComplete { offset_rad } = frame.calibration {
            info!(offset_deg = offset_rad.to_degrees(), "heading calibration locked");
            self.status(format!("heading calibration locked at {:.1}°", offset_rad.to_degrees()));
        }

        self.frames.send_replace(Some(FrameUpdate {
            t: payload.t,
            pose: frame.pose,
            transform: frame.pose.transform(),
            motion_heading: frame.motion_heading,
            speed_mps: frame.speed_mps,
            calibration: frame.calibration,
            offset_rad: self.composer.calibration().offset_rad(),
            nav: payload.nav.clone(),
            retarget,
            applied: self.ingest.applied(),
        }));
    }

    fn on_camera_tick(&mut self) {
        let ctx = self.composer.telemetry().map(|telemetry| CaptureContext {
            telemetry,
            mount: self.retargeter.joint(&self.config.mount_joint).copied(),
        });
        let outcome = self.scheduler.tick_camera(self.live, ctx);
        debug!(?outcome, "camera tick");
    }

    fn on_probe_tick(&mut self) {
        let base_height_m = self.composer.terrain().height_m();
        let outcome = self
            .scheduler
            .tick_probe(self.live, self.composer.telemetry(), base_height_m);
        debug!(?outcome, "terrain probe tick");
    }

    fn on_capture_done(&mut self, done: CaptureDone) {
        match &done {
            CaptureDone::Camera {
                result: Ok(CameraResult::Sent),
                latency,
            } => self.metrics.capture_completed(*latency),
            CaptureDone::Camera { result: Err(e), .. } => warn!(error = %e, "camera capture failed"),
            CaptureDone::Camera { .. } => {}
            CaptureDone::Probe { samples } => {
                let fan = self.config.scheduler.probe_bearings_deg.len() * self.config.scheduler.probe_distances_m.len();
                self.metrics.terrain_queried(2 * fan as u64);
                if *samples > 0 {
                    self.metrics.probe_sent();
                }
            }
        }
        if let Some(line) = self.scheduler.notice_for(&done) {
            self.status(line);
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::SetOffset(offset_rad, reply) => {
                let applied = self.composer.calibration_mut().set_offset(offset_rad);
                let _ = reply.send(applied);
            }
            ClientCommand::ClearOverride(reply) => {
                let _ = reply.send(self.composer.calibration_mut().clear_override());
            }
            ClientCommand::ReportObstacles(obstacles, reply) => {
                let _ = reply.send(self.scheduler.report_obstacles(self.live, obstacles));
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn on_perf_tick(&mut self) {
        let counters = self.connection.counters.clone();
        if let Some(summary) = self.metrics.roll(Instant::now(), || counters.take()) {
            debug!("{summary}");
            self.status(summary.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::{StreamExt, sink, stream};
    use std::sync::Mutex;
    use strider_hal::capture::CallbackCapture;
    use strider_hal::sim::SimTerrain;
    use strider_middleware::Channel;
    use strider_perception::geo::offset_fix;
    use strider_types::GeoFix;

    struct NullStore;

    impl CalibrationStore for NullStore {
        fn load(&self) -> Result<Option<f64>, StriderError> {
            Ok(None)
        }
        fn save(&mut self, _offset_rad: f64) -> Result<(), StriderError> {
            Ok(())
        }
        fn clear(&mut self) -> Result<(), StriderError> {
            Ok(())
        }
    }

    struct Peer {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    /// Hands out one piped channel, then refuses.
    struct OnceDialer {
        channel: Mutex<Option<Channel>>,
    }

    #[async_trait]
    impl Dialer for OnceDialer {
        async fn dial(&self, _url: &str) -> Result<Channel, StriderError> {
            self.channel
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| StriderError::Channel("refused".into()))
        }
    }

    fn pipe() -> (Channel, Peer) {
        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
        let sink = sink::unfold(client_tx, |tx, item: String| async move {
            tx.send(item).map_err(|e| StriderError::Channel(e.to_string()))?;
            Ok::<_, StriderError>(tx)
        });
        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|text| (Ok(text), rx))
        });
        (
            Channel {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            },
            Peer { to_client, from_client },
        )
    }

    const ORIGIN: GeoFix = GeoFix { lat: 47.3769, lon: 8.5417 };

    fn start() -> (ClientHandle, Peer) {
        let (channel, peer) = pipe();
        let deps = ClientDeps {
            dialer: Arc::new(OnceDialer {
                channel: Mutex::new(Some(channel)),
            }),
            terrain: Arc::new(SimTerrain::flat(ORIGIN, 400.0)),
            capture: Arc::new(CallbackCapture::from_fn(|_: CaptureContext| async { Ok(Some(vec![7u8; 4])) })),
            calibration_store: Box::new(NullStore),
            joint_map: JointMap::default(),
        };
        (RobotClient::spawn(RobotClientConfig::default(), deps), peer)
    }

    fn pose_json(t: f64, fix: GeoFix) -> String {
        format!(
            r#"{{"t":{t},"root":{{"lat":{},"lon":{},"height":0,"quat":[1,0,0,0]}},"links":{{"head":{{"pos":[0,0,1.6],"quat":[1,0,0,0]}}}}}}"#,
            fix.lat, fix.lon
        )
    }

    async fn wait_live(handle: &mut ClientHandle) {
        while let Some(ev) = handle.events.recv().await {
            if ev == ClientEvent::State(ConnectionState::Live) {
                return;
            }
        }
        panic!("client never went live");
    }

    async fn wait_applied(handle: &mut ClientHandle, n: u64) -> FrameUpdate {
        loop {
            if let Some(frame) = handle.frames.borrow_and_update().clone() {
                if frame.applied >= n {
                    return frame;
                }
            }
            handle.frames.changed().await.unwrap();
        }
    }

    /// Next outbound message of `kind`, skipping others.
    async fn next_of_kind(peer: &mut Peer, kind: &str) -> serde_json::Value {
        while let Some(text) = peer.from_client.recv().await {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
        panic!("channel closed before {kind}");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_frames_apply_once_and_motion_drives_heading() {
        let (mut handle, mut peer) = start();
        wait_live(&mut handle).await;
        next_of_kind(&mut peer, "session_start").await;

        peer.to_client.send(pose_json(1.0, ORIGIN)).unwrap();
        let first = wait_applied(&mut handle, 1).await;
        assert_eq!(first.t, 1.0);
        assert!(first.motion_heading.is_none());
        assert_eq!(first.retarget.applied, 1);
        assert!((first.pose.height_m - 400.0).abs() < 1e-6);
        assert!((first.transform.translation.z - 400.0).abs() < 1e-6);

        peer.to_client.send(pose_json(1.0, ORIGIN)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.frames.borrow().as_ref().unwrap().applied, 1);

        let north = offset_fix(ORIGIN, 0.0, 2.0);
        peer.to_client.send(pose_json(2.0, north)).unwrap();
        let second = wait_applied(&mut handle, 2).await;
        assert_eq!(second.t, 2.0);
        let heading = second.motion_heading.unwrap();
        assert!(heading.abs() < 1e-3, "motion heading {heading}");
        assert!(second.speed_mps > 0.0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn obstacle_reports_carry_only_valid_entries() {
        let (mut handle, mut peer) = start();
        wait_live(&mut handle).await;

        let valid = DynamicObstacle {
            id: "cyclist-3".into(),
            lat: ORIGIN.lat,
            lon: ORIGIN.lon,
            radius_m: 0.8,
            kind: Some("cyclist".into()),
            speed_mps: Some(4.0),
            forward_m: None,
            lateral_m: None,
        };
        let mut invalid = valid.clone();
        invalid.id = "ghost".into();
        invalid.radius_m = -1.0;

        let outcome = handle.report_obstacles(vec![valid, invalid.clone()]).await.unwrap();
        assert_eq!(outcome, ObstacleOutcome::Sent { count: 1 });
        let report = next_of_kind(&mut peer, "dynamic_obstacles").await;
        let obstacles = report["obstacles"].as_array().unwrap();
        assert_eq!(obstacles.len(), 1);
        assert_eq!(obstacles[0]["id"], "cyclist-3");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = handle.report_obstacles(vec![invalid]).await.unwrap();
        assert_eq!(outcome, ObstacleOutcome::Empty);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn camera_frames_follow_the_first_pose() {
        let (mut handle, mut peer) = start();
        wait_live(&mut handle).await;
        peer.to_client.send(pose_json(1.0, ORIGIN)).unwrap();
        wait_applied(&mut handle, 1).await;

        let frame = next_of_kind(&mut peer, "camera_frame").await;
        assert_eq!(frame["image"], "BwcHBw==");
        assert!((frame["robot"]["lat"].as_f64().unwrap() - ORIGIN.lat).abs() < 1e-9);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_offset_round_trip() {
        let (handle, _peer) = start();
        assert_eq!(handle.set_offset(0.5).await.unwrap(), 0.5);
        assert_eq!(handle.set_offset(f64::NAN).await.unwrap(), 0.5);
        handle.clear_override().await.unwrap();
        assert_eq!(handle.set_offset(-0.25).await.unwrap(), -0.25);
        handle.shutdown().await;
    }
}
