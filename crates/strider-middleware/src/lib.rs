//! `strider-middleware` – transport layer of the telemetry client.
//!
//! # Modules
//!
//! - [`connection`] – [`ConnectionManager`][connection::ConnectionManager]:
//!   dial, announce, route frames, reconnect after a fixed delay.  The
//!   transport sits behind [`Dialer`][connection::Dialer];
//!   [`WsDialer`][connection::WsDialer] speaks WebSocket.
//! - [`codec`] – lenient inbound JSON classification and outbound encoding.

pub mod codec;
pub mod connection;

pub use connection::{
    Channel, ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager,
    ConnectionState, Dialer, LatestPose, StreamCounters, WsDialer,
};
