//! Latency probe ledger for a single player.
//!
//! Every outgoing `Ping` gets a fresh [`PingId`] and its send time is kept
//! until the matching `PingResponse` arrives. Replies that match nothing are
//! reported as [`ProtocolError::StaleOrUnknownProbe`] and leave the ledger
//! untouched. Probes that are never answered are swept after `probe_timeout`,
//! and the ledger never holds more than `max_outstanding` entries.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::PingConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Locally assigned probe identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PingId(pub u32);

impl fmt::Display for PingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingProbe {
    id: PingId,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct PingTracker {
    next_id: u32,
    /// Outstanding probes in send order
    ledger: VecDeque<PendingProbe>,
    /// Most recent samples, oldest first, at most `smoothing_window` long
    samples: VecDeque<Duration>,
    estimate_ms: u32,
    probe_timeout: Duration,
    max_outstanding: usize,
    smoothing_window: usize,
}

impl PingTracker {
    pub fn new(config: &PingConfig) -> Self {
        Self {
            next_id: 0,
            ledger: VecDeque::new(),
            samples: VecDeque::with_capacity(config.smoothing_window.max(1)),
            estimate_ms: 0,
            probe_timeout: config.probe_timeout,
            max_outstanding: config.max_outstanding.max(1),
            smoothing_window: config.smoothing_window.max(1),
        }
    }

    /// Id the next `record_probe` will hand out
    pub fn next_probe_id(&self) -> PingId {
        PingId(self.next_id)
    }

    /// Allocate the next probe id and remember when it was sent.
    pub fn record_probe(&mut self, now: Instant) -> PingId {
        let id = PingId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        if self.ledger.len() >= self.max_outstanding {
            if let Some(evicted) = self.ledger.pop_front() {
                debug!(ping_id = %evicted.id, "Evicting oldest outstanding probe");
            }
        }

        self.ledger.push_back(PendingProbe { id, sent_at: now });
        global_metrics().probe_issued();
        trace!(ping_id = %id, outstanding = self.ledger.len(), "Probe recorded");
        id
    }

    /// Match a reply against the ledger and fold the round trip into the estimate.
    ///
    /// # Errors
    /// `StaleOrUnknownProbe` if `id` is not outstanding. The ledger is unchanged.
    pub fn resolve_probe(&mut self, id: PingId, arrival: Instant) -> Result<Duration> {
        let Some(index) = self.ledger.iter().position(|probe| probe.id == id) else {
            global_metrics().stale_probe();
            return Err(ProtocolError::StaleOrUnknownProbe(id));
        };

        // position() just found it
        let probe = self.ledger.remove(index).ok_or(ProtocolError::StaleOrUnknownProbe(id))?;
        let sample = arrival.saturating_duration_since(probe.sent_at);

        if self.samples.len() == self.smoothing_window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.estimate_ms = self.mean_sample_ms();

        global_metrics().probe_resolved();
        trace!(
            ping_id = %id,
            sample_ms = sample.as_millis() as u64,
            ping_ms = self.estimate_ms,
            "Probe resolved"
        );
        Ok(sample)
    }

    /// Drop probes whose reply is overdue. Returns how many were removed.
    pub fn expire_stale(&mut self, now: Instant) -> usize {
        let before = self.ledger.len();
        let timeout = self.probe_timeout;
        self.ledger
            .retain(|probe| now.saturating_duration_since(probe.sent_at) < timeout);

        let removed = before - self.ledger.len();
        if removed > 0 {
            debug!(removed, "Expired unanswered probes");
        }
        removed
    }

    /// Smoothed round-trip estimate in milliseconds, 0 before the first sample
    pub fn ping_ms(&self) -> u32 {
        self.estimate_ms
    }

    pub fn outstanding(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_outstanding(&self, id: PingId) -> bool {
        self.ledger.iter().any(|probe| probe.id == id)
    }

    fn mean_sample_ms(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        let total: Duration = self.samples.iter().sum();
        let mean = total / self.samples.len() as u32;
        u32::try_from(mean.as_millis()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window: usize) -> PingTracker {
        PingTracker::new(&PingConfig {
            smoothing_window: window,
            ..PingConfig::default()
        })
    }

    #[test]
    fn ids_are_distinct_and_increasing() {
        let mut t = tracker(1);
        let now = Instant::now();
        let a = t.record_probe(now);
        let b = t.record_probe(now);
        assert_eq!(a, PingId(0));
        assert_eq!(b, PingId(1));
        assert_eq!(t.outstanding(), 2);
    }

    #[test]
    fn next_probe_id_is_a_peek() {
        let mut t = tracker(1);
        let peeked = t.next_probe_id();
        assert_eq!(t.next_probe_id(), peeked);
        assert_eq!(t.outstanding(), 0);
        assert_eq!(t.record_probe(Instant::now()), peeked);
    }

    #[test]
    fn resolving_second_leaves_first() {
        let mut t = tracker(1);
        let now = Instant::now();
        let first = t.record_probe(now);
        let second = t.record_probe(now);

        t.resolve_probe(second, now + Duration::from_millis(40))
            .unwrap();
        assert!(t.is_outstanding(first));
        assert!(!t.is_outstanding(second));
        assert_eq!(t.ping_ms(), 40);
    }

    #[test]
    fn unknown_probe_leaves_ledger_untouched() {
        let mut t = tracker(1);
        let now = Instant::now();
        t.record_probe(now);

        let err = t.resolve_probe(PingId(99), now).unwrap_err();
        assert!(matches!(err, ProtocolError::StaleOrUnknownProbe(PingId(99))));
        assert_eq!(t.outstanding(), 1);
        assert_eq!(t.ping_ms(), 0);
    }

    #[test]
    fn duplicate_reply_is_stale() {
        let mut t = tracker(1);
        let now = Instant::now();
        let id = t.record_probe(now);
        t.resolve_probe(id, now + Duration::from_millis(10)).unwrap();
        assert!(t.resolve_probe(id, now + Duration::from_millis(20)).is_err());
        assert_eq!(t.ping_ms(), 10);
    }

    #[test]
    fn estimate_is_windowed_mean() {
        let mut t = tracker(2);
        let now = Instant::now();
        for rtt in [10u64, 30, 50] {
            let id = t.record_probe(now);
            t.resolve_probe(id, now + Duration::from_millis(rtt)).unwrap();
        }
        // Only the last two samples count
        assert_eq!(t.ping_ms(), 40);
    }

    #[test]
    fn stale_probes_expire() {
        let mut t = PingTracker::new(&PingConfig {
            probe_timeout: Duration::from_secs(1),
            ..PingConfig::default()
        });
        let start = Instant::now();
        t.record_probe(start);
        let fresh = t.record_probe(start + Duration::from_millis(900));

        assert_eq!(t.expire_stale(start + Duration::from_millis(1500)), 1);
        assert!(t.is_outstanding(fresh));
    }

    #[test]
    fn ledger_is_bounded() {
        let mut t = PingTracker::new(&PingConfig {
            max_outstanding: 2,
            ..PingConfig::default()
        });
        let now = Instant::now();
        let oldest = t.record_probe(now);
        t.record_probe(now);
        t.record_probe(now);
        assert_eq!(t.outstanding(), 2);
        assert!(!t.is_outstanding(oldest));
    }
}
