//! Rolling runtime counters, summarised once per measurement window.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Per-second rates over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSummary {
    pub window: Duration,
    pub pose_apply_hz: f64,
    pub terrain_query_hz: f64,
    pub probe_hz: f64,
    pub stream_in_hz: f64,
    pub stream_out_hz: f64,
    /// Mean camera capture latency, if any capture completed.
    pub capture_latency_ms: Option<f64>,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[perf] pose {:.1}/s terrain {:.1}/s probe {:.2}/s in {:.1}/s out {:.1}/s",
            self.pose_apply_hz, self.terrain_query_hz, self.probe_hz, self.stream_in_hz, self.stream_out_hz
        )?;
        match self.capture_latency_ms {
            Some(ms) => write!(f, " capture {ms:.0} ms"),
            None => write!(f, " capture -"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeMetrics {
    window: Duration,
    started: Instant,
    pose_applies: u64,
    terrain_queries: u64,
    probes: u64,
    capture_latency_total: Duration,
    captures: u64,
}

impl RuntimeMetrics {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            pose_applies: 0,
            terrain_queries: 0,
            probes: 0,
            capture_latency_total: Duration::ZERO,
            captures: 0,
        }
    }

    pub fn pose_applied(&mut self) {
        self.pose_applies += 1;
    }

    pub fn terrain_queried(&mut self, n: u64) {
        self.terrain_queries += n;
    }

    pub fn probe_sent(&mut self) {
        self.probes += 1;
    }

    pub fn capture_completed(&mut self, latency: Duration) {
        self.capture_latency_total += latency;
        self.captures += 1;
    }

    /// Close the window if it has elapsed.  `stream` is the `(in, out)` frame
    /// count for the window, owned by the connection.
    pub fn roll(&mut self, now: Instant, stream: impl FnOnce() -> (u64, u64)) -> Option<MetricsSummary> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let secs = elapsed.as_secs_f64();
        let (stream_in, stream_out) = stream();
        let summary = MetricsSummary {
            window: elapsed,
            pose_apply_hz: self.pose_applies as f64 / secs,
            terrain_query_hz: self.terrain_queries as f64 / secs,
            probe_hz: self.probes as f64 / secs,
            stream_in_hz: stream_in as f64 / secs,
            stream_out_hz: stream_out as f64 / secs,
            capture_latency_ms: (self.captures > 0)
                .then(|| self.capture_latency_total.as_secs_f64() * 1000.0 / self.captures as f64),
        };
        *self = Self::new(self.window, now);
        Some(summary)
    }
}
