//! Metrics Collection
//!
//! Collects and exposes metrics for monitoring the peer monitor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::PeerState;

/// Metrics collector for the peer monitor
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    // === Jobs ===

    /// Full sweeps that wrote their results
    pub sweeps_completed: AtomicU64,

    /// Full sweeps discarded by the sanity guard
    pub sweeps_rejected: AtomicU64,

    /// Jobs skipped because another one held the guard
    pub sweeps_skipped: AtomicU64,

    /// Jobs aborted by a systemic error
    pub sweeps_failed: AtomicU64,

    /// Offline-only sweeps that completed
    pub offline_sweeps: AtomicU64,

    /// Reward feed syncs that completed
    pub reward_syncs: AtomicU64,

    // === Peers ===

    /// Addresses probed across all sweeps
    pub peers_probed: AtomicU64,

    /// Probes that got no usable answer
    pub probe_failures: AtomicU64,

    /// Rows evicted by sweeps
    pub peers_evicted: AtomicU64,

    /// Rows removed by cleanup
    pub peers_cleaned: AtomicU64,

    // === Gauges ===

    pub peers_total: AtomicU64,
    pub peers_online: AtomicU64,
    pub peers_unreachable: AtomicU64,
    pub peers_sync: AtomicU64,
    pub peers_stuck: AtomicU64,
    pub peers_forked: AtomicU64,

    /// Height of the last chain reference used
    pub reference_height: AtomicU64,

    /// Unix time of the last completed full sweep
    pub last_sweep_timestamp: AtomicU64,
}

/// JSON form of the metrics
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sweeps_completed: u64,
    pub sweeps_rejected: u64,
    pub sweeps_skipped: u64,
    pub sweeps_failed: u64,
    pub offline_sweeps: u64,
    pub reward_syncs: u64,
    pub peers_probed: u64,
    pub probe_failures: u64,
    pub peers_evicted: u64,
    pub peers_cleaned: u64,
    pub peers_total: u64,
    pub peers_online: u64,
    pub peers_unreachable: u64,
    pub peers_sync: u64,
    pub peers_stuck: u64,
    pub peers_forked: u64,
    pub reference_height: u64,
    pub last_sweep_timestamp: u64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_sweeps_completed(&self) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sweeps_rejected(&self) {
        self.sweeps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sweeps_skipped(&self) {
        self.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sweeps_failed(&self) {
        self.sweeps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_offline_sweeps(&self) {
        self.offline_sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reward_syncs(&self) {
        self.reward_syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the probe totals of one sweep
    pub fn add_probes(&self, probed: u64, failed: u64) {
        self.peers_probed.fetch_add(probed, Ordering::Relaxed);
        self.probe_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn add_evicted(&self, count: u64) {
        self.peers_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_cleaned(&self, count: u64) {
        self.peers_cleaned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_reference_height(&self, height: u64) {
        self.reference_height.store(height, Ordering::Relaxed);
    }

    pub fn set_last_sweep_timestamp(&self, timestamp: u64) {
        self.last_sweep_timestamp.store(timestamp, Ordering::Relaxed);
    }

    pub fn set_peers_total(&self, count: u64) {
        self.peers_total.store(count, Ordering::Relaxed);
    }

    /// Update the gauge for one state
    pub fn set_state_count(&self, state: PeerState, count: u64) {
        let gauge = match state {
            PeerState::Online => &self.peers_online,
            PeerState::Unreachable => &self.peers_unreachable,
            PeerState::Sync => &self.peers_sync,
            PeerState::Stuck => &self.peers_stuck,
            PeerState::Forked => &self.peers_forked,
        };
        gauge.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            sweeps_rejected: self.sweeps_rejected.load(Ordering::Relaxed),
            sweeps_skipped: self.sweeps_skipped.load(Ordering::Relaxed),
            sweeps_failed: self.sweeps_failed.load(Ordering::Relaxed),
            offline_sweeps: self.offline_sweeps.load(Ordering::Relaxed),
            reward_syncs: self.reward_syncs.load(Ordering::Relaxed),
            peers_probed: self.peers_probed.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            peers_evicted: self.peers_evicted.load(Ordering::Relaxed),
            peers_cleaned: self.peers_cleaned.load(Ordering::Relaxed),
            peers_total: self.peers_total.load(Ordering::Relaxed),
            peers_online: self.peers_online.load(Ordering::Relaxed),
            peers_unreachable: self.peers_unreachable.load(Ordering::Relaxed),
            peers_sync: self.peers_sync.load(Ordering::Relaxed),
            peers_stuck: self.peers_stuck.load(Ordering::Relaxed),
            peers_forked: self.peers_forked.load(Ordering::Relaxed),
            reference_height: self.reference_height.load(Ordering::Relaxed),
            last_sweep_timestamp: self.last_sweep_timestamp.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let m = self.snapshot();
        let mut output = String::new();

        let mut metric = |name: &str, kind: &str, help: &str, value: u64| {
            output.push_str(&format!(
                "# HELP brs_peer_monitor_{name} {help}\n\
                 # TYPE brs_peer_monitor_{name} {kind}\n\
                 brs_peer_monitor_{name} {value}\n\n"
            ));
        };

        metric("uptime_seconds", "gauge", "Monitor uptime in seconds", m.uptime_secs);

        // Jobs
        metric("sweeps_completed_total", "counter", "Full sweeps committed", m.sweeps_completed);
        metric("sweeps_rejected_total", "counter", "Full sweeps rejected by the sanity guard", m.sweeps_rejected);
        metric("sweeps_skipped_total", "counter", "Jobs skipped while another held the lock", m.sweeps_skipped);
        metric("sweeps_failed_total", "counter", "Jobs aborted by a systemic error", m.sweeps_failed);
        metric("offline_sweeps_total", "counter", "Offline-only sweeps committed", m.offline_sweeps);
        metric("reward_syncs_total", "counter", "Reward feed syncs committed", m.reward_syncs);

        // Probes
        metric("peers_probed_total", "counter", "Addresses probed", m.peers_probed);
        metric("probe_failures_total", "counter", "Probes without a usable answer", m.probe_failures);
        metric("peers_evicted_total", "counter", "Rows evicted as stale by sweeps", m.peers_evicted);
        metric("peers_cleaned_total", "counter", "Rows removed by cleanup", m.peers_cleaned);

        // Store
        metric("peers", "gauge", "Rows in the peer store", m.peers_total);
        metric("reference_height", "gauge", "Height of the last chain reference", m.reference_height);
        metric("last_sweep_timestamp", "gauge", "Unix time of the last committed sweep", m.last_sweep_timestamp);

        for (state, value) in [
            (PeerState::Online, m.peers_online),
            (PeerState::Unreachable, m.peers_unreachable),
            (PeerState::Sync, m.peers_sync),
            (PeerState::Stuck, m.peers_stuck),
            (PeerState::Forked, m.peers_forked),
        ] {
            output.push_str(&format!(
                "brs_peer_monitor_peers_by_state{{state=\"{}\"}} {}\n",
                state, value
            ));
        }

        output
    }
}
