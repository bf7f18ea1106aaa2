//! Discovery server counters.
//!
//! Metric names are namespaced under `gatewatch.xds.*`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names.
pub mod names {
    /// Streams accepted into the broadcast group.
    pub const SESSIONS_OPENED: &str = "gatewatch.xds.sessions_opened_total";
    /// Streams that left the broadcast group.
    pub const SESSIONS_CLOSED: &str = "gatewatch.xds.sessions_closed_total";
    /// Streams rejected for missing node identity or wrong resource type.
    pub const SUBSCRIBERS_REJECTED: &str = "gatewatch.xds.subscribers_rejected_total";
    /// Broadcasts performed.
    pub const BROADCASTS: &str = "gatewatch.xds.broadcasts_total";
    /// Payloads queued for sessions, initial sends included.
    pub const DELIVERIES: &str = "gatewatch.xds.deliveries_total";
    /// Sessions disconnected because their delivery queue was full.
    pub const SLOW_CONSUMER_DISCONNECTS: &str = "gatewatch.xds.slow_consumer_disconnects_total";
    /// Sessions closed because a write to the client timed out.
    pub const SEND_TIMEOUTS: &str = "gatewatch.xds.send_timeouts_total";
    /// Responses rejected by clients.
    pub const NACKS: &str = "gatewatch.xds.nacks_total";
}

/// Atomic counters shared by the connection manager and session loops.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    subscribers_rejected: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    slow_consumer_disconnects: AtomicU64,
    send_timeouts: AtomicU64,
    nacks: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_rejected(&self) {
        self.subscribers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast(&self, delivered: u64) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered, Ordering::Relaxed);
    }

    pub fn delivered(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slow_consumer_disconnect(&self) {
        self.slow_consumer_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_timeout(&self) {
        self.send_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nack(&self) {
        self.nacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            subscribers_rejected: self.subscribers_rejected.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            slow_consumer_disconnects: self.slow_consumer_disconnects.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            nacks: self.nacks.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub subscribers_rejected: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub slow_consumer_disconnects: u64,
    pub send_timeouts: u64,
    pub nacks: u64,
}

impl MetricsSnapshot {
    /// Named counter pairs, for log lines and exporters.
    pub fn counters(&self) -> [(&'static str, u64); 8] {
        [
            (names::SESSIONS_OPENED, self.sessions_opened),
            (names::SESSIONS_CLOSED, self.sessions_closed),
            (names::SUBSCRIBERS_REJECTED, self.subscribers_rejected),
            (names::BROADCASTS, self.broadcasts),
            (names::DELIVERIES, self.deliveries),
            (names::SLOW_CONSUMER_DISCONNECTS, self.slow_consumer_disconnects),
            (names::SEND_TIMEOUTS, self.send_timeouts),
            (names::NACKS, self.nacks),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_counts_deliveries() {
        let metrics = ServerMetrics::new();
        metrics.delivered();
        metrics.broadcast(3);
        metrics.broadcast(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.broadcasts, 2);
        assert_eq!(snapshot.deliveries, 4);
    }

    #[test]
    fn test_counters_are_named() {
        let metrics = ServerMetrics::new();
        metrics.nack();
        let counters = metrics.snapshot().counters();
        assert!(counters.contains(&(names::NACKS, 1)));
    }
}
