use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct RelayMetrics {
    pub notifications_received: AtomicU64,
    pub notifications_malformed: AtomicU64,
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,
    pub evictions: AtomicU64,
    pub listener_reconnects: AtomicU64,
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub notifications_received: u64,
    pub notifications_malformed: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub evictions: u64,
    pub listener_reconnects: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
}

impl RelayMetrics {
    pub fn add(counter: &AtomicU64, count: u64) {
        if count > 0 {
            counter.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_malformed: self.notifications_malformed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            listener_reconnects: self.listener_reconnects.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
        }
    }
}
