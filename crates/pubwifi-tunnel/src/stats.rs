//! Tunnel counters shared between the loops and the controller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct TunnelStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
    dropped_outbound: AtomicU64,
    replay_rejected: AtomicU64,
    auth_failed: AtomicU64,
    malformed: AtomicU64,
    /// f64 bits
    failure_ratio: AtomicU64,
}

/// Point-in-time copy of [`TunnelStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub dropped_outbound: u64,
    pub replay_rejected: u64,
    pub auth_failed: u64,
    pub malformed: u64,
    pub failure_ratio: f64,
}

impl StatsSnapshot {
    /// Inbound frames that were rejected for any reason.
    pub fn rejected(&self) -> u64 {
        self.replay_rejected + self.auth_failed + self.malformed
    }
}

impl TunnelStats {
    pub(crate) fn record_sent(&self, plaintext_len: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(plaintext_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, plaintext_len: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(plaintext_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_outbound(&self) {
        self.dropped_outbound.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay(&self) {
        self.replay_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auth_failure(&self) {
        self.auth_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_failure_ratio(&self, ratio: f64) {
        self.failure_ratio
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    pub fn failure_ratio(&self) -> f64 {
        f64::from_bits(self.failure_ratio.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            dropped_outbound: self.dropped_outbound.load(Ordering::Relaxed),
            replay_rejected: self.replay_rejected.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failure_ratio: self.failure_ratio(),
        }
    }
}
