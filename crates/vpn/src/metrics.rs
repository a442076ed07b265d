//! Engine statistics
//!
//! Thread-safe atomic counters covering tunnels, SAs, packet protection,
//! and negotiation outcomes. Cloning shares the underlying counters, so
//! engines and the tunnel manager update one set of numbers. The snapshot
//! is pull-based: observers call [`EngineMetrics::snapshot`] whenever a
//! dashboard refresh is due.
//!
//! # Example
//!
//! ```
//! use netlab_vpn::metrics::EngineMetrics;
//!
//! let metrics = EngineMetrics::new();
//! metrics.record_negotiation_started();
//! metrics.record_negotiation_completed();
//! metrics.record_packet_encrypted(1400);
//!
//! let stats = metrics.snapshot();
//! assert_eq!(stats.ike_negotiations_completed, 1);
//! assert_eq!(stats.bytes_encrypted, 1400);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared atomic statistics counters
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Tunnels currently established or rekeying
    pub active_tunnels: Arc<AtomicU64>,

    /// Tunnels ever created
    pub total_tunnels: Arc<AtomicU64>,

    /// IKE SAs currently alive
    pub active_ike_sas: Arc<AtomicU64>,

    /// IPSec SAs currently alive
    pub active_ipsec_sas: Arc<AtomicU64>,

    /// Packets encapsulated
    pub packets_encrypted: Arc<AtomicU64>,

    /// Packets decapsulated
    pub packets_decrypted: Arc<AtomicU64>,

    /// Payload bytes encapsulated
    pub bytes_encrypted: Arc<AtomicU64>,

    /// Payload bytes decapsulated
    pub bytes_decrypted: Arc<AtomicU64>,

    /// Negotiations started
    pub ike_negotiations_started: Arc<AtomicU64>,

    /// Negotiations that reached established
    pub ike_negotiations_completed: Arc<AtomicU64>,

    /// Negotiations that failed
    pub ike_negotiations_failed: Arc<AtomicU64>,

    /// Rekey operations completed
    pub rekey_operations: Arc<AtomicU64>,

    /// Pre-shared-key verification failures
    pub auth_failures: Arc<AtomicU64>,

    /// Packets rejected by anti-replay
    pub replay_attacks_blocked: Arc<AtomicU64>,
}

impl EngineMetrics {
    /// Create a fresh counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tunnel record being created
    pub fn record_tunnel_created(&self) {
        self.total_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tunnel entering the active (established/rekeying) set
    pub fn record_tunnel_up(&self) {
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tunnel leaving the active set
    pub fn record_tunnel_down(&self) {
        self.active_tunnels.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an IKE SA entering the registry
    pub fn record_ike_sa_created(&self) {
        self.active_ike_sas.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an IKE SA leaving the registry
    pub fn record_ike_sa_deleted(&self) {
        self.active_ike_sas.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an IPSec SA entering the registry
    pub fn record_ipsec_sa_created(&self) {
        self.active_ipsec_sas.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an IPSec SA leaving the registry
    pub fn record_ipsec_sa_deleted(&self) {
        self.active_ipsec_sas.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a packet encapsulation of `bytes` payload bytes
    pub fn record_packet_encrypted(&self, bytes: u64) {
        self.packets_encrypted.fetch_add(1, Ordering::Relaxed);
        self.bytes_encrypted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a packet decapsulation of `bytes` payload bytes
    pub fn record_packet_decrypted(&self, bytes: u64) {
        self.packets_decrypted.fetch_add(1, Ordering::Relaxed);
        self.bytes_decrypted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a negotiation starting
    pub fn record_negotiation_started(&self) {
        self.ike_negotiations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a negotiation completing
    pub fn record_negotiation_completed(&self) {
        self.ike_negotiations_completed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a negotiation failing
    pub fn record_negotiation_failed(&self) {
        self.ike_negotiations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed rekey
    pub fn record_rekey(&self) {
        self.rekey_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pre-shared-key verification failure
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an anti-replay rejection
    pub fn record_replay_blocked(&self) {
        self.replay_attacks_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    ///
    /// Values may be slightly inconsistent across fields under concurrent
    /// updates.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_tunnels: self.active_tunnels.load(Ordering::Relaxed),
            total_tunnels: self.total_tunnels.load(Ordering::Relaxed),
            active_ike_sas: self.active_ike_sas.load(Ordering::Relaxed),
            active_ipsec_sas: self.active_ipsec_sas.load(Ordering::Relaxed),
            packets_encrypted: self.packets_encrypted.load(Ordering::Relaxed),
            packets_decrypted: self.packets_decrypted.load(Ordering::Relaxed),
            bytes_encrypted: self.bytes_encrypted.load(Ordering::Relaxed),
            bytes_decrypted: self.bytes_decrypted.load(Ordering::Relaxed),
            ike_negotiations_started: self.ike_negotiations_started.load(Ordering::Relaxed),
            ike_negotiations_completed: self.ike_negotiations_completed.load(Ordering::Relaxed),
            ike_negotiations_failed: self.ike_negotiations_failed.load(Ordering::Relaxed),
            rekey_operations: self.rekey_operations.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            replay_attacks_blocked: self.replay_attacks_blocked.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.active_tunnels.store(0, Ordering::Relaxed);
        self.total_tunnels.store(0, Ordering::Relaxed);
        self.active_ike_sas.store(0, Ordering::Relaxed);
        self.active_ipsec_sas.store(0, Ordering::Relaxed);
        self.packets_encrypted.store(0, Ordering::Relaxed);
        self.packets_decrypted.store(0, Ordering::Relaxed);
        self.bytes_encrypted.store(0, Ordering::Relaxed);
        self.bytes_decrypted.store(0, Ordering::Relaxed);
        self.ike_negotiations_started.store(0, Ordering::Relaxed);
        self.ike_negotiations_completed.store(0, Ordering::Relaxed);
        self.ike_negotiations_failed.store(0, Ordering::Relaxed);
        self.rekey_operations.store(0, Ordering::Relaxed);
        self.auth_failures.store(0, Ordering::Relaxed);
        self.replay_attacks_blocked.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of all statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Tunnels currently established or rekeying
    pub active_tunnels: u64,
    /// Tunnels ever created
    pub total_tunnels: u64,
    /// IKE SAs currently alive
    pub active_ike_sas: u64,
    /// IPSec SAs currently alive
    pub active_ipsec_sas: u64,
    /// Packets encapsulated
    pub packets_encrypted: u64,
    /// Packets decapsulated
    pub packets_decrypted: u64,
    /// Payload bytes encapsulated
    pub bytes_encrypted: u64,
    /// Payload bytes decapsulated
    pub bytes_decrypted: u64,
    /// Negotiations started
    pub ike_negotiations_started: u64,
    /// Negotiations completed
    pub ike_negotiations_completed: u64,
    /// Negotiations failed
    pub ike_negotiations_failed: u64,
    /// Rekey operations completed
    pub rekey_operations: u64,
    /// Pre-shared-key verification failures
    pub auth_failures: u64,
    /// Packets rejected by anti-replay
    pub replay_attacks_blocked: u64,
}

impl StatsSnapshot {
    /// Negotiation success rate in `[0.0, 1.0]`
    pub fn negotiation_success_rate(&self) -> f64 {
        if self.ike_negotiations_started == 0 {
            return 0.0;
        }
        self.ike_negotiations_completed as f64 / self.ike_negotiations_started as f64
    }

    /// Average encapsulated payload size in bytes
    pub fn avg_encrypted_packet_size(&self) -> f64 {
        if self.packets_encrypted == 0 {
            return 0.0;
        }
        self.bytes_encrypted as f64 / self.packets_encrypted as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_snapshot_is_zero() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_negotiation_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_negotiation_started();
        metrics.record_negotiation_started();
        metrics.record_negotiation_completed();
        metrics.record_negotiation_failed();
        metrics.record_auth_failure();

        let stats = metrics.snapshot();
        assert_eq!(stats.ike_negotiations_started, 2);
        assert_eq!(stats.ike_negotiations_completed, 1);
        assert_eq!(stats.ike_negotiations_failed, 1);
        assert_eq!(stats.auth_failures, 1);
        assert_eq!(stats.negotiation_success_rate(), 0.5);
    }

    #[test]
    fn test_packet_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_packet_encrypted(1500);
        metrics.record_packet_encrypted(500);
        metrics.record_packet_decrypted(1400);

        let stats = metrics.snapshot();
        assert_eq!(stats.packets_encrypted, 2);
        assert_eq!(stats.bytes_encrypted, 2000);
        assert_eq!(stats.packets_decrypted, 1);
        assert_eq!(stats.bytes_decrypted, 1400);
        assert_eq!(stats.avg_encrypted_packet_size(), 1000.0);
    }

    #[test]
    fn test_sa_gauges() {
        let metrics = EngineMetrics::new();
        metrics.record_ike_sa_created();
        metrics.record_ipsec_sa_created();
        metrics.record_ipsec_sa_created();

        let stats = metrics.snapshot();
        assert_eq!(stats.active_ike_sas, 1);
        assert_eq!(stats.active_ipsec_sas, 2);

        metrics.record_ipsec_sa_deleted();
        metrics.record_ipsec_sa_deleted();
        metrics.record_ike_sa_deleted();

        let stats = metrics.snapshot();
        assert_eq!(stats.active_ike_sas, 0);
        assert_eq!(stats.active_ipsec_sas, 0);
    }

    #[test]
    fn test_clone_shares_counters() {
        let a = EngineMetrics::new();
        let b = a.clone();
        a.record_replay_blocked();
        b.record_replay_blocked();

        assert_eq!(a.snapshot().replay_attacks_blocked, 2);
        assert_eq!(b.snapshot().replay_attacks_blocked, 2);
    }

    #[test]
    fn test_reset() {
        let metrics = EngineMetrics::new();
        metrics.record_tunnel_created();
        metrics.record_tunnel_up();
        metrics.record_packet_encrypted(100);
        metrics.reset();
        assert_eq!(metrics.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_rate_with_no_traffic() {
        let stats = StatsSnapshot::default();
        assert_eq!(stats.negotiation_success_rate(), 0.0);
        assert_eq!(stats.avg_encrypted_packet_size(), 0.0);
    }
}
