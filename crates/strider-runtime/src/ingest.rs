//! Pose ingestion pipeline.
//!
//! Runs once per render tick against the connection's latest-pose slot.
//! A frame is applied at most once per distinct timestamp, and never sooner
//! than `min_interval` after the previous apply.  A frame that arrives too
//! early stays in the slot and is retried on the next tick; if a newer frame
//! replaces it meanwhile, only the newer one is ever applied.

use std::sync::Arc;
use std::time::Duration;

use strider_types::PosePayload;
use tokio::time::Instant;

/// What one tick should do.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestDecision {
    /// Nothing has arrived yet.
    Empty,
    /// The latest frame was already applied.
    Duplicate,
    /// A new frame is waiting for the minimum interval to elapse.
    Hold,
    Apply(Arc<PosePayload>),
}

#[derive(Debug, Clone)]
pub struct PoseIngest {
    min_interval: Duration,
    last_t: Option<f64>,
    last_apply: Option<Instant>,
    applied: u64,
}

impl PoseIngest {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_t: None,
            last_apply: None,
            applied: 0,
        }
    }

    /// Frames applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn decide(&self, latest: Option<&Arc<PosePayload>>, now: Instant) -> IngestDecision {
        let Some(payload) = latest else {
            return IngestDecision::Empty;
        };
        if self.last_t == Some(payload.t) {
            return IngestDecision::Duplicate;
        }
        if let Some(at) = self.last_apply {
            if now.saturating_duration_since(at) < self.min_interval {
                return IngestDecision::Hold;
            }
        }
        IngestDecision::Apply(payload.clone())
    }

    /// Record that the frame stamped `t` was applied at `now`.
    pub fn commit(&mut self, t: f64, now: Instant) {
        self.last_t = Some(t);
        self.last_apply = Some(now);
        self.applied += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strider_types::RootPose;
    use tokio::sync::watch;

    fn payload(t: f64) -> Arc<PosePayload> {
        Arc::new(PosePayload {
            t,
            sim_time_s: None,
            root: RootPose {
                lat: 1.0,
                lon: 2.0,
                height: 0.0,
                quat: [1.0, 0.0, 0.0, 0.0],
            },
            links: BTreeMap::new(),
            nav: None,
        })
    }

    /// One render tick: decide against the slot and commit on apply.
    fn tick(ingest: &mut PoseIngest, slot: &watch::Receiver<Option<Arc<PosePayload>>>, now: Instant) -> IngestDecision {
        let latest = slot.borrow().clone();
        let decision = ingest.decide(latest.as_ref(), now);
        if let IngestDecision::Apply(p) = &decision {
            ingest.commit(p.t, now);
        }
        decision
    }

    #[test]
    fn empty_slot_does_nothing() {
        let ingest = PoseIngest::new(Duration::from_millis(33));
        assert_eq!(ingest.decide(None, Instant::now()), IngestDecision::Empty);
    }

    #[test]
    fn same_timestamp_applies_once() {
        let (tx, rx) = watch::channel(None);
        let mut ingest = PoseIngest::new(Duration::from_millis(33));
        let t0 = Instant::now();

        tx.send_replace(Some(payload(1.0)));
        assert!(matches!(tick(&mut ingest, &rx, t0), IngestDecision::Apply(_)));
        tx.send_replace(Some(payload(1.0)));
        assert_eq!(tick(&mut ingest, &rx, t0 + Duration::from_millis(100)), IngestDecision::Duplicate);
        assert_eq!(ingest.applied(), 1);
    }

    #[test]
    fn early_frame_is_held_not_dropped() {
        let (tx, rx) = watch::channel(None);
        let mut ingest = PoseIngest::new(Duration::from_millis(33));
        let t0 = Instant::now();

        tx.send_replace(Some(payload(1.0)));
        tick(&mut ingest, &rx, t0);
        tx.send_replace(Some(payload(2.0)));
        assert_eq!(tick(&mut ingest, &rx, t0 + Duration::from_millis(10)), IngestDecision::Hold);
        let IngestDecision::Apply(p) = tick(&mut ingest, &rx, t0 + Duration::from_millis(40)) else {
            panic!("held frame must apply once the interval elapses");
        };
        assert_eq!(p.t, 2.0);
    }

    #[test]
    fn burst_applies_only_the_last() {
        let (tx, rx) = watch::channel(None);
        let mut ingest = PoseIngest::new(Duration::from_millis(33));
        let t0 = Instant::now();
        tick(&mut ingest, &rx, t0);

        tx.send_replace(Some(payload(0.5)));
        tick(&mut ingest, &rx, t0);
        for i in 1..=10 {
            tx.send_replace(Some(payload(1.0 + i as f64 * 0.001)));
            assert_eq!(tick(&mut ingest, &rx, t0 + Duration::from_millis(i * 2)), IngestDecision::Hold);
        }
        let IngestDecision::Apply(p) = tick(&mut ingest, &rx, t0 + Duration::from_millis(33)) else {
            panic!("expected apply");
        };
        assert!((p.t - 1.010).abs() < 1e-12);
        assert_eq!(ingest.applied(), 2);
    }
}
