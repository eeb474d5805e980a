//! `strider-perception` – estimation layer of the telemetry client.
//!
//! Turns the raw pose stream into a stable, terrain-grounded render pose and
//! a retargeted skeleton.  Everything here is deterministic given its inputs;
//! the only suspension point is the terrain query.
//!
//! # Modules
//!
//! - [`transform`] – vectors, quaternions and rigid transforms.
//! - [`geo`] – angle wrapping, shortest-path blending and equirectangular
//!   offsets.
//! - [`motion`] – [`MotionEstimator`][motion::MotionEstimator]: heading and
//!   speed from successive fixes.
//! - [`terrain`] – [`TerrainHeightEstimator`][terrain::TerrainHeightEstimator]
//!   over the [`TerrainQuery`][terrain::TerrainQuery] adapter.
//! - [`calibration`] –
//!   [`HeadingCalibrationEngine`][calibration::HeadingCalibrationEngine]:
//!   online two-phase heading offset learning.
//! - [`composer`] – [`SpatialPoseComposer`][composer::SpatialPoseComposer]:
//!   fuses the above into a [`RenderPose`][composer::RenderPose].
//! - [`retarget`] – [`LinkRetargeter`][retarget::LinkRetargeter] and the
//!   joint-name [`JointMap`][retarget::JointMap].

pub mod calibration;
pub mod composer;
pub mod geo;
pub mod motion;
pub mod retarget;
pub mod terrain;
pub mod transform;
