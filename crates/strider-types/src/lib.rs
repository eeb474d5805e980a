//! `strider-types` – shared data model for the Strider telemetry client.
//!
//! Holds the wire shapes exchanged with the remote simulator (inbound pose
//! payloads, outbound perception reports), the global [`StriderError`], and
//! the small persistence port used by the heading calibration engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Inbound: pose stream
// ────────────────────────────────────────────────────────────────────────────

/// A geographic position in WGS-84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
}

impl GeoFix {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Root placement of the robot as reported by the simulator.
///
/// Authoritative for position and orientation but carries no heading or
/// velocity; those are derived client-side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootPose {
    pub lat: f64,
    pub lon: f64,
    /// Simulator-frame height of the root body (metres).
    pub height: f64,
    /// Orientation quaternion `[w, x, y, z]`.
    pub quat: [f64; 4],
}

impl RootPose {
    pub fn fix(&self) -> GeoFix {
        GeoFix::new(self.lat, self.lon)
    }

    /// `true` when every field is finite and the quaternion is non-degenerate.
    pub fn is_valid(&self) -> bool {
        let finite = self.lat.is_finite()
            && self.lon.is_finite()
            && self.height.is_finite()
            && self.quat.iter().all(|c| c.is_finite());
        let norm_sq: f64 = self.quat.iter().map(|c| c * c).sum();
        finite && norm_sq > 1e-12
    }
}

/// Local transform of one skeleton link in the simulator's convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkPose {
    pub pos: [f64; 3],
    /// `[w, x, y, z]`
    pub quat: [f64; 4],
}

/// Advisory navigation state forwarded by the simulator.
///
/// Not computed here; only sanitised before being surfaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationContext {
    #[serde(default)]
    pub current_waypoint: Option<[f64; 2]>,
    #[serde(default)]
    pub remaining_waypoints: Option<i64>,
    #[serde(default)]
    pub running: Option<bool>,
    #[serde(default)]
    pub cross_track_error_m: Option<f64>,
    #[serde(default)]
    pub progress_pct: Option<f64>,
    #[serde(default)]
    pub off_route: Option<bool>,
    #[serde(default)]
    pub speed_requested: Option<f64>,
    #[serde(default)]
    pub speed_achieved: Option<f64>,
    #[serde(default)]
    pub terrain_block_reason: Option<String>,
    #[serde(default)]
    pub obstacle_block_reason: Option<String>,
}

impl NavigationContext {
    /// Drop non-finite numbers, clamp progress to `[0, 100]`, floor the
    /// waypoint count at zero and discard blank block reasons.
    pub fn sanitized(self) -> Self {
        fn finite(v: Option<f64>) -> Option<f64> {
            v.filter(|x| x.is_finite())
        }
        fn reason(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            current_waypoint: self
                .current_waypoint
                .filter(|[lat, lon]| lat.is_finite() && lon.is_finite()),
            remaining_waypoints: self.remaining_waypoints.map(|n| n.max(0)),
            running: self.running,
            cross_track_error_m: finite(self.cross_track_error_m),
            progress_pct: finite(self.progress_pct).map(|p| p.clamp(0.0, 100.0)),
            off_route: self.off_route,
            speed_requested: finite(self.speed_requested),
            speed_achieved: finite(self.speed_achieved),
            terrain_block_reason: reason(self.terrain_block_reason),
            obstacle_block_reason: reason(self.obstacle_block_reason),
        }
    }

    /// Non-empty block reasons, terrain first.
    pub fn block_reasons(&self) -> Vec<&str> {
        [&self.terrain_block_reason, &self.obstacle_block_reason]
            .into_iter()
            .filter_map(|r| r.as_deref())
            .collect()
    }
}

/// One decoded pose frame. Ephemeral: consumed at most once per distinct `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct PosePayload {
    /// Monotonic simulator timestamp (seconds).
    pub t: f64,
    pub sim_time_s: Option<f64>,
    pub root: RootPose,
    pub links: BTreeMap<String, LinkPose>,
    pub nav: Option<NavigationContext>,
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Status or error text; never carries pose data.
    Status(String),
    Pose(Box<PosePayload>),
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound: perception reports
// ────────────────────────────────────────────────────────────────────────────

/// Robot state attached to every perception report.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotTelemetry {
    pub lat: f64,
    pub lon: f64,
    pub height_m: f64,
    /// Compass heading, clockwise from north (degrees, `[0, 360)`).
    pub heading_deg: f64,
    pub speed_mps: f64,
}

/// One terrain probe sample relative to the robot's current heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainSample {
    pub bearing_deg: f64,
    pub distance_m: f64,
    pub height_m: f64,
    /// `height_m` minus the probe's base height.
    pub delta_m: f64,
}

/// A moving obstacle observed client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObstacle {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lateral_m: Option<f64>,
}

impl DynamicObstacle {
    /// Non-empty id, finite coordinates, strictly positive finite radius.
    /// Optional numeric fields must be finite when present.
    pub fn is_valid(&self) -> bool {
        let optional_ok = [self.speed_mps, self.forward_m, self.lateral_m]
            .iter()
            .all(|v| v.is_none_or(f64::is_finite));
        !self.id.trim().is_empty()
            && self.lat.is_finite()
            && self.lon.is_finite()
            && self.radius_m.is_finite()
            && self.radius_m > 0.0
            && optional_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session_id: Uuid,
    pub t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFrameReport {
    /// Base64 image bytes without a data-URI prefix.
    pub image: String,
    pub captured_at_ms: i64,
    pub robot: RobotTelemetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainProbeReport {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub base_height_m: f64,
    pub samples: Vec<TerrainSample>,
    pub robot: RobotTelemetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObstaclesReport {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub obstacles: Vec<DynamicObstacle>,
}

/// Every message this client pushes back toward the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SessionStart(SessionStart),
    CameraFrame(CameraFrameReport),
    TerrainProbe(TerrainProbeReport),
    DynamicObstacles(DynamicObstaclesReport),
}

impl OutboundMessage {
    /// Wire `type` tag, handy for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::SessionStart(_) => "session_start",
            OutboundMessage::CameraFrame(_) => "camera_frame",
            OutboundMessage::TerrainProbe(_) => "terrain_probe",
            OutboundMessage::DynamicObstacles(_) => "dynamic_obstacles",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Persistence port
// ────────────────────────────────────────────────────────────────────────────

/// Where the heading calibration offset lives between sessions.
///
/// Values are radians normalised to `[-π, π]`.
pub trait CalibrationStore: Send {
    fn load(&self) -> Result<Option<f64>, StriderError>;
    fn save(&mut self, offset_rad: f64) -> Result<(), StriderError>;
    fn clear(&mut self) -> Result<(), StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for the telemetry client.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StriderError {
    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Terrain Query Error: {0}")]
    Terrain(String),

    #[error("Capture Error: {0}")]
    Capture(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
