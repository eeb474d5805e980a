//! Stream connection manager.
//!
//! [`ConnectionManager`] owns the duplex channel to the simulator:
//!
//! ```text
//!   Offline ──dial──▶ Connecting ──open──▶ Live
//!      ▲                   │                 │
//!      └──── delay ◀───────┴── error/close ◀─┘
//! ```
//!
//! The manager runs as one tokio task.  It reports lifecycle changes and
//! status lines over an event channel, stores pose frames in a
//! last-write-wins [`watch`] slot, and forwards [`OutboundMessage`]s while
//! live.  Reconnects repeat forever until [`ConnectionHandle::shutdown`].
//!
//! The transport is behind the [`Dialer`] trait; [`WsDialer`] is the
//! `tokio-tungstenite` implementation.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt, future};
use strider_types::{InboundFrame, OutboundMessage, PosePayload, SessionStart, StriderError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::codec::{decode_inbound, encode_outbound};

// ────────────────────────────────────────────────────────────────────────────
// Transport seam
// ────────────────────────────────────────────────────────────────────────────

pub type FrameSink = Pin<Box<dyn Sink<String, Error = StriderError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, StriderError>>;

/// An open text channel.  The stream ending means the peer closed.
pub struct Channel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens [`Channel`]s to an endpoint.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Channel, StriderError>;
}

/// WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Channel, StriderError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| StriderError::Channel(format!("connect {url}: {e}")))?;
        let (tx, rx) = ws.split();

        let sink = tx
            .sink_map_err(|e| StriderError::Channel(e.to_string()))
            .with(|text: String| future::ok::<_, StriderError>(Message::Text(text.into())));

        let stream = rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(StriderError::Channel(e.to_string()))),
            })
        });

        Ok(Channel {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration, state, events
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    /// Wait between a close/error and the next dial.
    pub reconnect_delay: Duration,
    /// Outbound queue depth; excess messages are dropped by the sender.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            reconnect_delay: Duration::from_millis(1500),
            outbound_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Live,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Status(String),
}

/// Frames seen on the wire, drained by the metrics window.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub inbound: AtomicU64,
    pub outbound: AtomicU64,
}

impl StreamCounters {
    /// Return `(inbound, outbound)` and reset both.
    pub fn take(&self) -> (u64, u64) {
        (
            self.inbound.swap(0, Ordering::Relaxed),
            self.outbound.swap(0, Ordering::Relaxed),
        )
    }
}

/// Latest pose slot: every new frame replaces the previous one.
pub type LatestPose = watch::Receiver<Option<Arc<PosePayload>>>;

/// Caller's side of a running [`ConnectionManager`].
pub struct ConnectionHandle {
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub latest: LatestPose,
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub counters: Arc<StreamCounters>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Stop reconnecting, close any open channel and wait for the task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "connection task ended abnormally");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manager
// ────────────────────────────────────────────────────────────────────────────

enum SessionEnd {
    Closed,
    Shutdown,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    dialer: Arc<dyn Dialer>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    latest: watch::Sender<Option<Arc<PosePayload>>>,
    outbound: mpsc::Receiver<OutboundMessage>,
    counters: Arc<StreamCounters>,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
}

impl ConnectionManager {
    /// Start the connection loop on the current runtime.
    pub fn spawn(config: ConnectionConfig, dialer: Arc<dyn Dialer>) -> ConnectionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (latest_tx, latest_rx) = watch::channel(None);
        let (out_tx, out_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(StreamCounters::default());

        let manager = Self {
            config,
            dialer,
            events: events_tx,
            latest: latest_tx,
            outbound: out_rx,
            counters: counters.clone(),
            shutdown: shutdown_rx,
            state: ConnectionState::Offline,
        };
        let task = tokio::spawn(manager.run());

        ConnectionHandle {
            events: events_rx,
            latest: latest_rx,
            outbound: out_tx,
            counters,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            info!(state = %state, "connection state changed");
            let _ = self.events.send(ConnectionEvent::State(state));
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    #[instrument(skip_all, fields(url = %self.config.url))]
    async fn run(mut self) {
        while !self.stopping() {
            self.set_state(ConnectionState::Connecting);

            let dialed = tokio::select! {
                r = self.dialer.dial(&self.config.url) => Some(r),
                _ = self.shutdown.changed() => None,
            };
            match dialed {
                None => break,
                Some(Ok(channel)) => {
                    if let SessionEnd::Shutdown = self.session(channel).await {
                        break;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "dial failed"),
            }

            self.set_state(ConnectionState::Offline);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        self.set_state(ConnectionState::Offline);
        debug!("connection manager stopped");
    }

    async fn send(&mut self, channel: &mut Channel, msg: &OutboundMessage) -> Result<(), StriderError> {
        let text = encode_outbound(msg)?;
        channel.sink.send(text).await?;
        self.counters.outbound.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn session(&mut self, mut channel: Channel) -> SessionEnd {
        // Anything queued while offline is stale.
        while self.outbound.try_recv().is_ok() {}

        self.set_state(ConnectionState::Live);
        let hello = OutboundMessage::SessionStart(SessionStart {
            session_id: Uuid::new_v4(),
            t: Utc::now().timestamp_millis() as f64 / 1000.0,
        });
        if let Err(e) = self.send(&mut channel, &hello).await {
            warn!(error = %e, "session announcement failed");
            return SessionEnd::Closed;
        }

        loop {
            tokio::select! {
                frame = channel.stream.next() => match frame {
                    Some(Ok(text)) => self.on_frame(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "channel error");
                        return SessionEnd::Closed;
                    }
                    None => {
                        info!("channel closed by peer");
                        return SessionEnd::Closed;
                    }
                },
                msg = self.outbound.recv() => {
                    // Every sender gone: the handle was dropped.
                    let Some(msg) = msg else {
                        let _ = channel.sink.close().await;
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.send(&mut channel, &msg).await {
                        warn!(kind = msg.kind(), error = %e, "send failed");
                        return SessionEnd::Closed;
                    }
                }
                _ = self.shutdown.changed() => {
                    let _ = channel.sink.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        self.counters.inbound.fetch_add(1, Ordering::Relaxed);
        match decode_inbound(text) {
            Ok(Some(InboundFrame::Status(line))) => {
                let _ = self.events.send(ConnectionEvent::Status(line));
            }
            Ok(Some(InboundFrame::Pose(payload))) => {
                self.latest.send_replace(Some(Arc::from(payload)));
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "ignoring malformed frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Channel whose far end is visible to the test.
    struct Peer {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
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

    /// Hands out scripted channels, then channels that close immediately.
    #[derive(Default)]
    struct ScriptedDialer {
        scripted: Mutex<VecDeque<Channel>>,
        fail: bool,
        dials: Mutex<Vec<Instant>>,
    }

    impl ScriptedDialer {
        fn dial_times(&self) -> Vec<Instant> {
            self.dials.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, _url: &str) -> Result<Channel, StriderError> {
            self.dials.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(StriderError::Channel("refused".into()));
            }
            if let Some(ch) = self.scripted.lock().unwrap().pop_front() {
                return Ok(ch);
            }
            let (ch, peer) = pipe();
            drop(peer);
            Ok(ch)
        }
    }

    async fn wait_for(handle: &mut ConnectionHandle, want: ConnectionEvent) {
        while let Some(ev) = handle.events.recv().await {
            if ev == want {
                return;
            }
        }
        panic!("event stream ended before {want:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn close_schedules_one_delayed_reconnect_each_time() {
        let dialer = Arc::new(ScriptedDialer::default());
        let mut handle = ConnectionManager::spawn(ConnectionConfig::default(), dialer.clone());

        for _ in 0..3 {
            wait_for(&mut handle, ConnectionEvent::State(ConnectionState::Live)).await;
            wait_for(&mut handle, ConnectionEvent::State(ConnectionState::Offline)).await;
        }
        handle.shutdown().await;

        let times = dialer.dial_times();
        assert!(times.len() >= 3);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1500), "gap={gap:?}");
            assert!(gap < Duration::from_millis(1600), "gap={gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dials_keep_retrying_until_shutdown() {
        let dialer = Arc::new(ScriptedDialer {
            fail: true,
            ..Default::default()
        });
        let handle = ConnectionManager::spawn(ConnectionConfig::default(), dialer.clone());

        tokio::time::sleep(Duration::from_millis(1500 * 4 + 100)).await;
        let before = dialer.dial_times().len();
        assert_eq!(before, 5);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(dialer.dial_times().len(), before);
    }

    #[tokio::test]
    async fn live_session_announces_and_routes_frames() {
        let (ch, mut peer) = pipe();
        let dialer = Arc::new(ScriptedDialer::default());
        dialer.scripted.lock().unwrap().push_back(ch);
        let mut handle = ConnectionManager::spawn(ConnectionConfig::default(), dialer.clone());

        wait_for(&mut handle, ConnectionEvent::State(ConnectionState::Live)).await;
        let hello = peer.from_client.recv().await.unwrap();
        assert!(hello.contains("\"type\":\"session_start\""));

        peer.to_client
            .send(r#"{"type":"status","message":"route ready"}"#.into())
            .unwrap();
        wait_for(&mut handle, ConnectionEvent::Status("route ready".into())).await;

        for t in [1.0, 2.0, 3.0] {
            peer.to_client
                .send(format!(
                    r#"{{"t":{t},"root":{{"lat":1,"lon":2,"height":0,"quat":[1,0,0,0]}}}}"#
                ))
                .unwrap();
        }
        peer.to_client.send("garbage".into()).unwrap();
        peer.to_client
            .send(r#"{"type":"status","message":"sync"}"#.into())
            .unwrap();
        wait_for(&mut handle, ConnectionEvent::Status("sync".into())).await;
        let latest = handle.latest.borrow().clone().unwrap();
        assert_eq!(latest.t, 3.0);

        handle
            .outbound
            .send(OutboundMessage::SessionStart(SessionStart {
                session_id: Uuid::nil(),
                t: 9.0,
            }))
            .await
            .unwrap();
        let echoed = peer.from_client.recv().await.unwrap();
        assert!(echoed.contains("\"t\":9.0"));
        assert!(handle.counters.take().0 >= 6);

        handle.shutdown().await;
        assert_eq!(dialer.dial_times().len(), 1);
    }
}
