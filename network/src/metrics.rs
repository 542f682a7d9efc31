//! Counters for protocol activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type SharedNetworkMetrics = Arc<NetworkMetrics>;

#[derive(Debug, Default)]
pub struct NetworkMetrics {
    peers_connected: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    dial_failures: AtomicU64,
    identify_queries_sent: AtomicU64,
    identify_timeouts: AtomicU64,
    records_discovered: AtomicU64,
    chunks_relayed: AtomicU64,
}

impl NetworkMetrics {
    pub fn inc_peers_connected(&self) {
        self.peers_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_peers_connected(&self) {
        let _ = self
            .peers_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn inc_packets_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_packets_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dial_failures(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_identify_queries_sent(&self) {
        self.identify_queries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_identify_timeouts(&self) {
        self.identify_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_discovered(&self, n: u64) {
        self.records_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_chunks_relayed(&self) {
        self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            peers_connected: self.peers_connected.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            identify_queries_sent: self.identify_queries_sent.load(Ordering::Relaxed),
            identify_timeouts: self.identify_timeouts.load(Ordering::Relaxed),
            records_discovered: self.records_discovered.load(Ordering::Relaxed),
            chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub peers_connected: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub dial_failures: u64,
    pub identify_queries_sent: u64,
    pub identify_timeouts: u64,
    pub records_discovered: u64,
    pub chunks_relayed: u64,
}
