//! Observability and Metrics
//!
//! Process-wide counters for the transport layer. Uses atomic counters so any
//! session task can record without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for transport operations
#[derive(Debug)]
pub struct Metrics {
    /// Total player sessions started
    pub sessions_total: AtomicU64,
    /// Currently running player sessions
    pub sessions_active: AtomicU64,
    /// Encoded packets handed to a channel
    pub packets_sent: AtomicU64,
    /// Track chunk frames handed to a channel
    pub chunks_sent: AtomicU64,
    /// Total bytes handed to channels, tags included
    pub bytes_sent: AtomicU64,
    /// Frames received from clients
    pub frames_received: AtomicU64,
    /// Packets that failed to encode
    pub encode_failures: AtomicU64,
    /// Channel sends that failed
    pub transport_failures: AtomicU64,
    /// Completed track transfers
    pub tracks_sent: AtomicU64,
    /// Aborted track transfers
    pub tracks_failed: AtomicU64,
    /// Latency probes issued
    pub probes_issued: AtomicU64,
    /// Latency probes matched by a reply
    pub probes_resolved: AtomicU64,
    /// Replies that matched no outstanding probe
    pub stale_probes: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            tracks_sent: AtomicU64::new(0),
            tracks_failed: AtomicU64::new(0),
            probes_issued: AtomicU64::new(0),
            probes_resolved: AtomicU64::new(0),
            stale_probes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_started(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an encoded packet sent
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a raw chunk frame sent
    pub fn chunk_sent(&self, byte_count: u64) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_sent(&self) {
        self.tracks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_failed(&self) {
        self.tracks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn probe_issued(&self) {
        self.probes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn probe_resolved(&self) {
        self.probes_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_probe(&self) {
        self.stale_probes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            tracks_sent: self.tracks_sent.load(Ordering::Relaxed),
            tracks_failed: self.tracks_failed.load(Ordering::Relaxed),
            probes_issued: self.probes_issued.load(Ordering::Relaxed),
            probes_resolved: self.probes_resolved.load(Ordering::Relaxed),
            stale_probes: self.stale_probes.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_total = snapshot.sessions_total,
            sessions_active = snapshot.sessions_active,
            packets_sent = snapshot.packets_sent,
            chunks_sent = snapshot.chunks_sent,
            bytes_sent = snapshot.bytes_sent,
            frames_received = snapshot.frames_received,
            encode_failures = snapshot.encode_failures,
            transport_failures = snapshot.transport_failures,
            tracks_sent = snapshot.tracks_sent,
            tracks_failed = snapshot.tracks_failed,
            probes_issued = snapshot.probes_issued,
            probes_resolved = snapshot.probes_resolved,
            stale_probes = snapshot.stale_probes,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub packets_sent: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub encode_failures: u64,
    pub transport_failures: u64,
    pub tracks_sent: u64,
    pub tracks_failed: u64,
    pub probes_issued: u64,
    pub probes_resolved: u64,
    pub stale_probes: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.packet_sent(6);
        metrics.chunk_sent(16384);
        metrics.session_started();
        metrics.session_started();
        metrics.session_ended();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.chunks_sent, 1);
        assert_eq!(snapshot.bytes_sent, 16390);
        assert_eq!(snapshot.sessions_total, 2);
        assert_eq!(snapshot.sessions_active, 1);
    }
}
