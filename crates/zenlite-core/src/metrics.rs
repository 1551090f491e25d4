//! Dispatch and command-correlation counters.
//!
//! Counters are plain atomics updated from the dispatcher loop and from
//! command callers; a [`DispatchMetricsSnapshot`] can be taken at any time
//! without blocking either side.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetricsSnapshot {
    /// Events drained from the transport channel.
    pub events_dispatched: u64,
    /// Status events routed to listeners.
    pub status_events: u64,
    /// Streaming events routed to listeners and buffers.
    pub streaming_events: u64,
    /// Command and sys-info responses routed to the correlator.
    pub responses: u64,
    /// Events dropped because their device was unknown.
    pub anomalies: u64,
    /// Responses for unknown or already-resolved correlation ids.
    pub stale_resolutions: u64,
    /// Pending commands cancelled by a disconnect.
    pub cancelled_commands: u64,
    /// Pending commands expired by the timeout sweeper.
    pub timed_out_commands: u64,
}

impl DispatchMetricsSnapshot {
    /// Fraction of dispatched events that were anomalies.
    pub fn anomaly_rate(&self) -> Option<f64> {
        if self.events_dispatched == 0 {
            None
        } else {
            Some(self.anomalies as f64 / self.events_dispatched as f64)
        }
    }
}

/// Thread-safe dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    events_dispatched: AtomicU64,
    status_events: AtomicU64,
    streaming_events: AtomicU64,
    responses: AtomicU64,
    anomalies: AtomicU64,
    stale_resolutions: AtomicU64,
    cancelled_commands: AtomicU64,
    timed_out_commands: AtomicU64,
}

impl DispatchMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self) {
        self.status_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_streaming(&self) {
        self.streaming_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_resolution(&self) {
        self.stale_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, count: usize) {
        self.cancelled_commands
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self, count: usize) {
        self.timed_out_commands
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            status_events: self.status_events.load(Ordering::Relaxed),
            streaming_events: self.streaming_events.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            stale_resolutions: self.stale_resolutions.load(Ordering::Relaxed),
            cancelled_commands: self.cancelled_commands.load(Ordering::Relaxed),
            timed_out_commands: self.timed_out_commands.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.events_dispatched.store(0, Ordering::Relaxed);
        self.status_events.store(0, Ordering::Relaxed);
        self.streaming_events.store(0, Ordering::Relaxed);
        self.responses.store(0, Ordering::Relaxed);
        self.anomalies.store(0, Ordering::Relaxed);
        self.stale_resolutions.store(0, Ordering::Relaxed);
        self.cancelled_commands.store(0, Ordering::Relaxed);
        self.timed_out_commands.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = DispatchMetrics::new();
        metrics.record_dispatched();
        metrics.record_dispatched();
        metrics.record_anomaly();
        metrics.record_cancelled(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_dispatched, 2);
        assert_eq!(snap.anomalies, 1);
        assert_eq!(snap.cancelled_commands, 3);
        assert_eq!(snap.anomaly_rate(), Some(0.5));
    }

    #[test]
    fn test_reset() {
        let metrics = DispatchMetrics::new();
        metrics.record_status();
        metrics.record_timed_out(2);
        metrics.reset();
        assert_eq!(metrics.snapshot(), DispatchMetricsSnapshot::default());
        assert_eq!(metrics.snapshot().anomaly_rate(), None);
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = DispatchMetrics::new();
        metrics.record_streaming();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"streaming_events\":1"));
    }
}
