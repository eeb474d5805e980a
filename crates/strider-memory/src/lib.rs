//! `strider-memory` – local persistence.
//!
//! # Modules
//!
//! - [`kv`] – [`KeyValueStore`][kv::KeyValueStore]: a single-table SQLite
//!   key-value store holding JSON values.
//! - [`calibration`] – [`CalibrationStore`][strider_types::CalibrationStore]
//!   adapters: SQLite-backed for real runs, in-memory for tests and
//!   ephemeral sessions.

pub mod calibration;
pub mod kv;
