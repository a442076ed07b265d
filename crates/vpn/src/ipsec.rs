//! IPSec engine: SA-pair lifecycle and packet protection
//!
//! Once an IKE SA establishes, the engine mints one inbound and one outbound
//! IPSec SA atomically. Outbound SAs stamp a monotone sequence counter on
//! every encapsulation; inbound SAs demultiplex by SPI and enforce
//! anti-replay before accepting a packet.
//!
//! SPIs are guaranteed unique across all currently active SAs. Failure
//! semantics follow the engine contract: expired lifetimes and selector
//! mismatches are recoverable, replay rejections are security events that
//! never abort the engine.

use crate::error::{Error, Result};
use crate::event::{EventBus, EventDetails, EventKind};
use crate::metrics::EngineMetrics;
use crate::packet::{PacketDescriptor, ProtectedPacket};
use crate::proposal::{EncapMode, IpsecProposal, IpsecProtocol};
use crate::replay::ReplayWindow;
use crate::selector::{Direction, TrafficSelector};
use crate::{IkeSaId, Spi, TunnelId};
use rand::Rng;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One direction of protected traffic for one tunnel
#[derive(Debug, Clone)]
pub struct IpsecSa {
    /// Security Parameter Index, unique among active SAs
    pub spi: Spi,
    /// IKE SA this SA was derived from
    pub ike_sa_id: IkeSaId,
    /// Owning tunnel
    pub tunnel_id: TunnelId,
    /// Traffic direction
    pub direction: Direction,
    /// Protection protocol
    pub protocol: IpsecProtocol,
    /// Encapsulation mode
    pub mode: EncapMode,
    /// Negotiated proposal
    pub proposal: IpsecProposal,
    /// Traffic this SA protects
    pub selector: TrafficSelector,
    /// Local gateway address
    pub local_ip: Ipv4Addr,
    /// Remote gateway address
    pub remote_ip: Ipv4Addr,
    /// Outbound sequence counter (meaningless for inbound SAs)
    pub seq_out: u64,
    /// Anti-replay window (inbound SAs only)
    pub replay_window: Option<ReplayWindow>,
    /// Lifetime after which the SA refuses traffic
    pub lifetime: Duration,
    /// Creation instant
    pub created_at: Instant,
    /// Payload bytes processed
    pub bytes_processed: u64,
}

impl IpsecSa {
    /// Age of this SA
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the lifetime has run out
    pub fn is_expired(&self) -> bool {
        self.age() >= self.lifetime
    }

    /// Stamp and return the next outbound sequence number
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for inbound SAs and on counter
    /// exhaustion (the SA must be rekeyed long before that point).
    pub fn next_sequence_number(&mut self) -> Result<u64> {
        if self.direction != Direction::Outbound {
            return Err(Error::InvalidState(
                "cannot stamp sequence number on an inbound SA".into(),
            ));
        }
        if self.seq_out == u64::MAX {
            return Err(Error::InvalidState(
                "sequence counter exhausted, SA must be rekeyed".into(),
            ));
        }
        self.seq_out += 1;
        Ok(self.seq_out)
    }

    /// Record processed payload bytes
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_processed = self.bytes_processed.saturating_add(bytes);
    }
}

/// The inbound/outbound SA pair minted for one established IKE SA
#[derive(Debug, Clone)]
pub struct SaPair {
    /// SA accepting traffic from the peer
    pub inbound: IpsecSa,
    /// SA protecting traffic toward the peer
    pub outbound: IpsecSa,
}

/// Simulated IPSec engine
///
/// Owns the IPSec SA registry, keyed by SPI. All mutation goes through the
/// public operations.
pub struct IpsecEngine {
    replay_window_size: u32,
    sas: Mutex<HashMap<Spi, IpsecSa>>,
    events: Arc<EventBus>,
    metrics: EngineMetrics,
}

impl IpsecEngine {
    /// Create an engine publishing to `events` and counting into `metrics`
    pub fn new(replay_window_size: u32, events: Arc<EventBus>, metrics: EngineMetrics) -> Self {
        IpsecEngine {
            replay_window_size,
            sas: Mutex::new(HashMap::new()),
            events,
            metrics,
        }
    }

    /// Mint the inbound/outbound SA pair for an established IKE SA
    ///
    /// Both SAs reference `ike_sa_id` and are inserted atomically; SPIs are
    /// freshly generated and unique among all active SAs.
    pub fn create_sa_pair(
        &self,
        ike_sa_id: IkeSaId,
        tunnel_id: TunnelId,
        proposal: &IpsecProposal,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        selector: TrafficSelector,
    ) -> Result<SaPair> {
        let mut sas = self.sas.lock().expect("IPSec registry poisoned");

        let spi_in = Self::fresh_spi(&sas)?;
        let spi_out = {
            // The inbound SPI is not inserted yet, so exclude it by hand
            let mut spi;
            loop {
                spi = Self::fresh_spi(&sas)?;
                if spi != spi_in {
                    break;
                }
            }
            spi
        };

        let make = |spi: Spi, direction: Direction| IpsecSa {
            spi,
            ike_sa_id,
            tunnel_id,
            direction,
            protocol: proposal.protocol,
            mode: proposal.mode,
            proposal: proposal.clone(),
            selector: selector.clone(),
            local_ip,
            remote_ip,
            seq_out: 0,
            replay_window: match direction {
                Direction::Inbound => Some(ReplayWindow::new(self.replay_window_size)),
                Direction::Outbound => None,
            },
            lifetime: proposal.lifetime,
            created_at: Instant::now(),
            bytes_processed: 0,
        };

        let inbound = make(spi_in, Direction::Inbound);
        let outbound = make(spi_out, Direction::Outbound);

        sas.insert(spi_in, inbound.clone());
        sas.insert(spi_out, outbound.clone());
        drop(sas);

        self.metrics.record_ipsec_sa_created();
        self.metrics.record_ipsec_sa_created();

        info!(
            ike_sa_id,
            tunnel_id,
            spi_in = %format_args!("0x{:08x}", spi_in),
            spi_out = %format_args!("0x{:08x}", spi_out),
            proposal = %proposal.summary(),
            "IPSec SA pair created"
        );

        Ok(SaPair { inbound, outbound })
    }

    /// Encapsulate a described packet under the outbound SA `spi`
    ///
    /// # Errors
    ///
    /// - [`Error::SaNotFound`] for an unknown SPI
    /// - [`Error::InvalidState`] when the SA is not outbound
    /// - [`Error::LifetimeExpired`] when the SA's lifetime ran out
    pub fn encapsulate(&self, spi: Spi, packet: &PacketDescriptor) -> Result<ProtectedPacket> {
        let protected = {
            let mut sas = self.sas.lock().expect("IPSec registry poisoned");
            let sa = sas
                .get_mut(&spi)
                .ok_or_else(|| Error::SaNotFound(format!("SPI 0x{:08x}", spi)))?;

            if sa.is_expired() {
                return Err(Error::LifetimeExpired(spi));
            }

            let seq = sa.next_sequence_number()?;
            sa.add_bytes(packet.size as u64);
            ProtectedPacket::encapsulate(spi, seq, &sa.proposal, packet.clone())
        };

        self.metrics.record_packet_encrypted(packet.size as u64);
        self.events.publish(
            EventKind::PacketEncrypted,
            format!(
                "{} packet encapsulated ({} -> {}, {} bytes)",
                protected.protocol, packet.source, packet.dest, packet.size
            ),
            EventDetails::packet(spi, protected.sequence, packet.size as u64),
        );
        debug!(
            spi = %format_args!("0x{:08x}", spi),
            seq = protected.sequence,
            payload_len = packet.size,
            "packet encapsulated"
        );

        Ok(protected)
    }

    /// Decapsulate a protected packet with the inbound SA matching its SPI
    ///
    /// Enforces anti-replay: a rejected sequence number increments the
    /// replay counter, publishes `replay:blocked`, and leaves the SA
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::SaNotFound`] for an unknown SPI
    /// - [`Error::InvalidState`] when the SA is not inbound
    /// - [`Error::LifetimeExpired`] when the SA's lifetime ran out
    /// - [`Error::ReplayDetected`] when anti-replay rejects the sequence
    pub fn decapsulate(&self, packet: &ProtectedPacket) -> Result<PacketDescriptor> {
        let verdict = {
            let mut sas = self.sas.lock().expect("IPSec registry poisoned");
            let sa = sas
                .get_mut(&packet.spi)
                .ok_or_else(|| Error::SaNotFound(format!("SPI 0x{:08x}", packet.spi)))?;

            if sa.direction != Direction::Inbound {
                return Err(Error::InvalidState(
                    "decapsulation requires an inbound SA".into(),
                ));
            }
            if sa.is_expired() {
                return Err(Error::LifetimeExpired(packet.spi));
            }

            let window = sa
                .replay_window
                .as_mut()
                .expect("inbound SA always carries a replay window");
            let verdict = window.check_and_update(packet.sequence);
            if verdict.is_accepted() {
                sa.add_bytes(packet.inner.size as u64);
            }
            verdict
        };

        if !verdict.is_accepted() {
            self.metrics.record_replay_blocked();
            self.events.publish(
                EventKind::ReplayBlocked,
                format!(
                    "replayed packet rejected (SPI 0x{:08x}, sequence {}: {})",
                    packet.spi,
                    packet.sequence,
                    verdict.reason()
                ),
                EventDetails::packet(packet.spi, packet.sequence, packet.inner.size as u64),
            );
            warn!(
                spi = %format_args!("0x{:08x}", packet.spi),
                seq = packet.sequence,
                reason = verdict.reason(),
                "replay attack blocked"
            );
            return Err(Error::ReplayDetected(packet.sequence));
        }

        self.metrics.record_packet_decrypted(packet.inner.size as u64);
        self.events.publish(
            EventKind::PacketDecrypted,
            format!(
                "{} packet decapsulated ({} -> {}, {} bytes)",
                packet.protocol, packet.inner.source, packet.inner.dest, packet.inner.size
            ),
            EventDetails::packet(packet.spi, packet.sequence, packet.inner.size as u64),
        );
        debug!(
            spi = %format_args!("0x{:08x}", packet.spi),
            seq = packet.sequence,
            payload_len = packet.inner.size,
            "packet decapsulated"
        );

        Ok(packet.inner.clone())
    }

    /// Select the best live SA whose selector contains the 5-tuple
    ///
    /// Tie-break: most-specific selector first, then most recently created.
    /// Expired SAs never match.
    pub fn find_matching_sa(
        &self,
        source: Ipv4Addr,
        dest: Ipv4Addr,
        protocol: u8,
        source_port: Option<u16>,
        dest_port: Option<u16>,
        direction: Direction,
    ) -> Option<IpsecSa> {
        let sas = self.sas.lock().expect("IPSec registry poisoned");
        sas.values()
            .filter(|sa| sa.direction == direction && !sa.is_expired())
            .filter(|sa| {
                sa.selector
                    .matches(source, dest, protocol, source_port, dest_port, direction)
            })
            .max_by_key(|sa| (sa.selector.specificity(), sa.created_at))
            .cloned()
    }

    /// Delete every SA derived from `ike_sa_id`; idempotent
    ///
    /// Returns the number of SAs removed.
    pub fn delete_sas_for_ike(&self, ike_sa_id: IkeSaId) -> usize {
        let removed: Vec<IpsecSa> = {
            let mut sas = self.sas.lock().expect("IPSec registry poisoned");
            let doomed: Vec<Spi> = sas
                .values()
                .filter(|sa| sa.ike_sa_id == ike_sa_id)
                .map(|sa| sa.spi)
                .collect();
            doomed.iter().filter_map(|spi| sas.remove(spi)).collect()
        };

        for sa in &removed {
            self.metrics.record_ipsec_sa_deleted();
            self.events.publish(
                EventKind::SaDeleted,
                format!(
                    "IPSec SA 0x{:08x} deleted ({} {})",
                    sa.spi,
                    sa.protocol,
                    sa.direction.as_str()
                ),
                EventDetails {
                    tunnel_id: Some(sa.tunnel_id),
                    ike_sa_id: Some(ike_sa_id),
                    spi: Some(sa.spi),
                    ..Default::default()
                },
            );
        }

        if !removed.is_empty() {
            info!(ike_sa_id, count = removed.len(), "IPSec SAs deleted");
        }
        removed.len()
    }

    /// Delete every SA belonging to `tunnel_id`; idempotent
    ///
    /// Sweep used on tunnel teardown to cover SAs whose owning IKE SA is
    /// already gone (e.g. a rekey cancelled between exchanges). Returns the
    /// number of SAs removed.
    pub fn delete_sas_for_tunnel(&self, tunnel_id: TunnelId) -> usize {
        let doomed: Vec<IkeSaId> = {
            let sas = self.sas.lock().expect("IPSec registry poisoned");
            let mut owners: Vec<IkeSaId> = sas
                .values()
                .filter(|sa| sa.tunnel_id == tunnel_id)
                .map(|sa| sa.ike_sa_id)
                .collect();
            owners.sort_unstable();
            owners.dedup();
            owners
        };

        doomed
            .into_iter()
            .map(|ike_sa_id| self.delete_sas_for_ike(ike_sa_id))
            .sum()
    }

    /// Re-parent all SAs of `old_ike` to `new_ike` after an IKE rekey
    ///
    /// Keeps the delete-cascade invariant intact without touching SPIs,
    /// counters, or replay windows. Returns the number of SAs re-parented.
    pub fn reassign_sas(&self, old_ike: IkeSaId, new_ike: IkeSaId) -> usize {
        let mut sas = self.sas.lock().expect("IPSec registry poisoned");
        let mut moved = 0;
        for sa in sas.values_mut() {
            if sa.ike_sa_id == old_ike {
                sa.ike_sa_id = new_ike;
                moved += 1;
            }
        }
        moved
    }

    /// Look up an SA by SPI
    pub fn get(&self, spi: Spi) -> Option<IpsecSa> {
        self.sas
            .lock()
            .expect("IPSec registry poisoned")
            .get(&spi)
            .cloned()
    }

    /// Number of SAs currently in the registry
    pub fn active_count(&self) -> usize {
        self.sas.lock().expect("IPSec registry poisoned").len()
    }

    /// SPIs of every SA owned by `ike_sa_id`
    pub fn spis_for_ike(&self, ike_sa_id: IkeSaId) -> Vec<Spi> {
        self.sas
            .lock()
            .expect("IPSec registry poisoned")
            .values()
            .filter(|sa| sa.ike_sa_id == ike_sa_id)
            .map(|sa| sa.spi)
            .collect()
    }

    /// Generate an SPI not present in the active set
    ///
    /// SPI values 0-255 are reserved and never produced.
    fn fresh_spi(sas: &HashMap<Spi, IpsecSa>) -> Result<Spi> {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let spi: Spi = rng.gen_range(256..=Spi::MAX);
            if !sas.contains_key(&spi) {
                return Ok(spi);
            }
        }
        // Practically unreachable: the space holds 2^32 - 256 values
        Err(Error::InvalidState("SPI space exhausted".into()))
    }
}
