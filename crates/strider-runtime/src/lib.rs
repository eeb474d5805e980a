//! `strider-runtime` – the telemetry client's event loop.
//!
//! # Modules
//!
//! - [`client`] – [`RobotClient`][client::RobotClient]: owns the connection,
//!   composer, retargeter and scheduler in a single tokio task and exposes a
//!   [`ClientHandle`][client::ClientHandle].
//! - [`ingest`] – [`PoseIngest`][ingest::PoseIngest]: at most one apply per
//!   distinct timestamp, spaced by a minimum interval.
//! - [`scheduler`] – [`PerceptionScheduler`][scheduler::PerceptionScheduler]:
//!   single-flight camera and terrain-probe captures plus rate-limited
//!   obstacle reports.
//! - [`metrics`] – [`RuntimeMetrics`][metrics::RuntimeMetrics]: windowed
//!   rates behind the `[perf]` status line.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP span export.

pub mod client;
pub mod ingest;
pub mod metrics;
pub mod scheduler;
pub mod telemetry;

pub use client::{ClientDeps, ClientEvent, ClientHandle, FrameUpdate, RobotClient, RobotClientConfig};
pub use ingest::{IngestDecision, PoseIngest};
pub use metrics::{MetricsSummary, RuntimeMetrics};
pub use scheduler::{ObstacleOutcome, PerceptionScheduler, SchedulerConfig, TickOutcome};
pub use telemetry::{TracerProviderGuard, init_tracing};
