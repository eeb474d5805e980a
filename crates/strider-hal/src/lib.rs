//! `strider-hal` – render and capture boundary.
//!
//! The 3-D engine is an external collaborator; this crate defines the narrow
//! surface the client needs from it and provides headless stand-ins.
//!
//! # Modules
//!
//! - [`camera`] – [`CameraFrame`][camera::CameraFrame] and the near-black
//!   luma check.
//! - [`rig`] – [`RenderRig`][rig::RenderRig] trait and the scoped
//!   [`CameraOverride`][rig::CameraOverride].
//! - [`capture`] – the [`CaptureProvider`][capture::CaptureProvider]
//!   capability with built-in rig and external callback implementations.
//! - [`sim`] – [`SimRenderRig`][sim::SimRenderRig] and
//!   [`SimTerrain`][sim::SimTerrain] for headless runs.

pub mod camera;
pub mod capture;
pub mod rig;
pub mod sim;
