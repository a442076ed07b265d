//! Tunnel manager: composing IKE and IPSec into one lifecycle
//!
//! A [`VpnTunnel`] is the externally visible entity. Its status walks
//!
//! ```text
//! Down → Connecting → Established ⇄ Rekeying
//!              ↓            ↓
//!            Error ←────────┘
//! ```
//!
//! with no hard terminal state: a tunnel can be deleted from anywhere.
//! The manager owns explicitly constructed engine instances (no global
//! singletons), so independent simulations — one per test, one per lab
//! scenario — never share state.
//!
//! # Example
//!
//! ```no_run
//! use netlab_vpn::config::{Endpoint, SimConfig, TunnelParams};
//! use netlab_vpn::tunnel::TunnelManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TunnelManager::new();
//!
//!     let params = TunnelParams::builder()
//!         .with_name("hq-to-branch")
//!         .with_local(Endpoint::new(
//!             "hq", "Headquarters",
//!             "203.0.113.1".parse()?,
//!             "192.168.1.0/24".parse()?,
//!         ))
//!         .with_remote(Endpoint::new(
//!             "branch", "Branch office",
//!             "198.51.100.7".parse()?,
//!             "192.168.10.0/24".parse()?,
//!         ))
//!         .with_preset("balanced")?
//!         .with_psk(*b"training-lab-psk")
//!         .build()?;
//!
//!     let tunnel = manager.create_tunnel(params).await?;
//!     println!("tunnel {} is {}", tunnel.name, tunnel.state.as_str());
//!     Ok(())
//! }
//! ```

use crate::config::{Endpoint, PresharedKey, SimConfig, TunnelParams, TunnelType};
use crate::dpd::DpdState;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventDetails, EventKind};
use crate::ike::IkeEngine;
use crate::ipsec::IpsecEngine;
use crate::metrics::{EngineMetrics, StatsSnapshot};
use crate::packet::{PacketDescriptor, ProtectedPacket};
use crate::proposal::{IkeProposal, IpsecProposal};
use crate::selector::{Direction, TrafficSelector};
use crate::{IkeSaId, Spi, TunnelId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{info, warn};

/// Tunnel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    /// Created, no negotiation attempted
    Down,
    /// Phase-1 negotiation running
    Connecting,
    /// SAs in place, traffic flows
    Established,
    /// IKE rekey in progress
    Rekeying,
    /// Last operation failed
    Error,
}

impl TunnelState {
    /// Lowercase label used in events and logs
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelState::Down => "down",
            TunnelState::Connecting => "connecting",
            TunnelState::Established => "established",
            TunnelState::Rekeying => "rekeying",
            TunnelState::Error => "error",
        }
    }

    /// Whether the tunnel counts toward the active-tunnels gauge
    pub fn is_active(self) -> bool {
        matches!(self, TunnelState::Established | TunnelState::Rekeying)
    }
}

/// Traffic and lifecycle counters of one tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelCounters {
    /// Packets decapsulated for this tunnel
    pub packets_in: u64,
    /// Packets encapsulated for this tunnel
    pub packets_out: u64,
    /// Payload bytes decapsulated
    pub bytes_in: u64,
    /// Payload bytes encapsulated
    pub bytes_out: u64,
    /// Completed rekey operations
    pub rekeys: u64,
}

/// The externally visible tunnel entity
#[derive(Debug, Clone)]
pub struct VpnTunnel {
    /// Unique tunnel id
    pub id: TunnelId,
    /// Display name
    pub name: String,
    /// Tunnel flavor
    pub tunnel_type: TunnelType,
    /// Local side
    pub local: Endpoint,
    /// Remote side
    pub remote: Endpoint,
    /// Chosen phase-1 proposal
    pub ike_proposal: IkeProposal,
    /// Chosen phase-2 proposal
    pub ipsec_proposal: IpsecProposal,
    /// Current status
    pub state: TunnelState,
    /// Active IKE SA, if negotiation succeeded
    pub ike_sa_id: Option<IkeSaId>,
    /// SPIs of the active IPSec SA pair
    pub ipsec_spis: Vec<Spi>,
    /// Traffic and rekey counters
    pub counters: TunnelCounters,
    /// Creation time
    pub created_at: SystemTime,
    /// Time the tunnel first reached `Established`
    pub established_at: Option<SystemTime>,
    /// Last packet or liveness activity
    pub last_activity: Option<SystemTime>,
    /// Liveness bookkeeping
    pub dpd: DpdState,
    /// Simulation switch: does the peer answer liveness probes?
    pub peer_responsive: bool,
    psk: PresharedKey,
}

impl VpnTunnel {
    /// Masked pre-shared key for UI display
    pub fn psk_masked(&self) -> &'static str {
        self.psk.masked()
    }

    /// Short fingerprint of the pre-shared key
    pub fn psk_fingerprint(&self) -> String {
        self.psk.fingerprint()
    }
}

/// Orchestrates the IKE and IPSec engines into tunnel lifecycles
pub struct TunnelManager {
    config: SimConfig,
    tunnels: Mutex<HashMap<TunnelId, VpnTunnel>>,
    ike: Arc<IkeEngine>,
    ipsec: Arc<IpsecEngine>,
    events: Arc<EventBus>,
    metrics: EngineMetrics,
    next_id: AtomicU64,
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelManager {
    /// Manager with default simulation settings
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Manager with explicit simulation settings
    pub fn with_config(config: SimConfig) -> Self {
        let events = Arc::new(EventBus::new(config.history_cap, config.channel_cap));
        let metrics = EngineMetrics::new();
        let ike = Arc::new(IkeEngine::new(
            config.phase_delay,
            config.min_psk_len,
            events.clone(),
            metrics.clone(),
        ));
        let ipsec = Arc::new(IpsecEngine::new(
            config.replay_window_size,
            events.clone(),
            metrics.clone(),
        ));

        TunnelManager {
            config,
            tunnels: Mutex::new(HashMap::new()),
            ike,
            ipsec,
            events,
            metrics,
            next_id: AtomicU64::new(1),
        }
    }

    /// Event bus shared by the manager and both engines
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// IKE engine handle for direct simulation calls
    pub fn ike_engine(&self) -> Arc<IkeEngine> {
        self.ike.clone()
    }

    /// IPSec engine handle for direct simulation calls
    pub fn ipsec_engine(&self) -> Arc<IpsecEngine> {
        self.ipsec.clone()
    }

    /// Pull-based statistics snapshot
    pub fn statistics(&self) -> StatsSnapshot {
        self.metrics.snapshot()
    }

    /// Create a tunnel and drive it to `Established`
    ///
    /// The record is inserted in `Down` and transitions through
    /// `Connecting`. On any failure the tunnel ends in `Error` with no
    /// dangling SAs, the error is returned, and the record stays queryable.
    pub async fn create_tunnel(&self, params: TunnelParams) -> Result<VpnTunnel> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tunnel = VpnTunnel {
            id,
            name: params.name,
            tunnel_type: params.tunnel_type,
            local: params.local,
            remote: params.remote,
            ike_proposal: params.ike_proposal,
            ipsec_proposal: params.ipsec_proposal,
            state: TunnelState::Down,
            ike_sa_id: None,
            ipsec_spis: Vec::new(),
            counters: TunnelCounters::default(),
            created_at: SystemTime::now(),
            established_at: None,
            last_activity: None,
            dpd: DpdState::new(),
            peer_responsive: true,
            psk: params.psk,
        };

        let (name, local, remote, ike_proposal, ipsec_proposal, psk) = (
            tunnel.name.clone(),
            tunnel.local.clone(),
            tunnel.remote.clone(),
            tunnel.ike_proposal.clone(),
            tunnel.ipsec_proposal.clone(),
            tunnel.psk.clone(),
        );

        self.tunnels
            .lock()
            .expect("tunnel registry poisoned")
            .insert(id, tunnel);
        self.metrics.record_tunnel_created();
        self.events.publish(
            EventKind::TunnelState,
            format!("tunnel \"{}\" created (down)", name),
            EventDetails::tunnel(id),
        );
        info!(tunnel_id = id, name = %name, "tunnel created");

        self.set_state(id, TunnelState::Connecting)?;

        let ike_sa = match self
            .ike
            .initiate(
                id,
                local.public_ip,
                remote.public_ip,
                ike_proposal,
                &psk,
            )
            .await
        {
            Ok(sa) => sa,
            Err(e) => {
                // The record may be gone if the tunnel was deleted meanwhile
                let _ = self.set_state(id, TunnelState::Error);
                return Err(e);
            }
        };

        let selector =
            TrafficSelector::between(local.private_network, remote.private_network);
        let pair = match self.ipsec.create_sa_pair(
            ike_sa.id,
            id,
            &ipsec_proposal,
            local.public_ip,
            remote.public_ip,
            selector,
        ) {
            Ok(pair) => pair,
            Err(e) => {
                self.ike.delete(ike_sa.id);
                let _ = self.set_state(id, TunnelState::Error);
                return Err(e);
            }
        };

        // Commit only if the tunnel still exists; a deletion that raced the
        // negotiation must not be resurrected.
        let committed = {
            let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
            match tunnels.get_mut(&id) {
                Some(t) => {
                    t.ike_sa_id = Some(ike_sa.id);
                    t.ipsec_spis = vec![pair.inbound.spi, pair.outbound.spi];
                    t.established_at = Some(SystemTime::now());
                    t.last_activity = Some(SystemTime::now());
                    t.dpd.mark_alive();
                    true
                }
                None => false,
            }
        };

        if !committed {
            self.ike.delete(ike_sa.id);
            self.ipsec.delete_sas_for_ike(ike_sa.id);
            return Err(Error::Cancelled(format!(
                "tunnel {} deleted during negotiation",
                id
            )));
        }

        self.set_state(id, TunnelState::Established)
    }

    /// Rekey an established tunnel's IKE SA in place
    ///
    /// IPSec SAs keep their SPIs and are re-parented to the new IKE SA;
    /// the tunnel's rekey counter increments.
    pub async fn rekey_tunnel(&self, id: TunnelId) -> Result<VpnTunnel> {
        let old_sa_id = {
            let tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
            let tunnel = tunnels.get(&id).ok_or(Error::TunnelNotFound(id))?;
            if tunnel.state != TunnelState::Established {
                return Err(Error::InvalidState(format!(
                    "cannot rekey tunnel in state {}",
                    tunnel.state.as_str()
                )));
            }
            tunnel
                .ike_sa_id
                .ok_or_else(|| Error::InvalidState("tunnel has no IKE SA".into()))?
        };

        self.set_state(id, TunnelState::Rekeying)?;

        let new_sa = match self.ike.rekey(old_sa_id, id).await {
            Ok(sa) => sa,
            Err(e) => {
                let _ = self.set_state(id, TunnelState::Error);
                return Err(e);
            }
        };

        self.ipsec.reassign_sas(old_sa_id, new_sa.id);

        let committed = {
            let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
            match tunnels.get_mut(&id) {
                Some(t) => {
                    t.ike_sa_id = Some(new_sa.id);
                    t.counters.rekeys += 1;
                    true
                }
                None => false,
            }
        };

        if !committed {
            self.ike.delete(new_sa.id);
            self.ipsec.delete_sas_for_ike(new_sa.id);
            return Err(Error::Cancelled(format!(
                "tunnel {} deleted during rekey",
                id
            )));
        }

        self.set_state(id, TunnelState::Established)
    }

    /// Delete a tunnel, cascading to all of its SAs
    ///
    /// Removing the record first makes any in-flight negotiation for this
    /// tunnel abort at its next commit point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TunnelNotFound`] for an unknown id.
    pub fn delete_tunnel(&self, id: TunnelId) -> Result<()> {
        let tunnel = self
            .tunnels
            .lock()
            .expect("tunnel registry poisoned")
            .remove(&id)
            .ok_or(Error::TunnelNotFound(id))?;

        if tunnel.state.is_active() {
            self.metrics.record_tunnel_down();
        }

        // Cascade: every IKE SA belonging to this tunnel (committed or
        // still negotiating) and all IPSec SAs they spawned
        for sa_id in self.ike.delete_for_tunnel(id) {
            self.ipsec.delete_sas_for_ike(sa_id);
        }
        // Sweep SAs orphaned by an interrupted rekey
        self.ipsec.delete_sas_for_tunnel(id);

        self.events.publish(
            EventKind::TunnelState,
            format!("tunnel \"{}\" deleted", tunnel.name),
            EventDetails::tunnel(id),
        );
        info!(tunnel_id = id, name = %tunnel.name, "tunnel deleted");
        Ok(())
    }

    /// Encrypt a described packet through the best-matching outbound SA
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorMismatch`] when no outbound SA covers the
    /// traffic, otherwise the encapsulation errors of the IPSec engine.
    pub fn encrypt_packet(&self, packet: &PacketDescriptor) -> Result<ProtectedPacket> {
        let sa = self
            .ipsec
            .find_matching_sa(
                packet.source,
                packet.dest,
                packet.protocol,
                packet.source_port,
                packet.dest_port,
                Direction::Outbound,
            )
            .ok_or_else(|| {
                Error::SelectorMismatch(format!("{} -> {}", packet.source, packet.dest))
            })?;

        let protected = self.ipsec.encapsulate(sa.spi, packet)?;
        self.note_traffic(sa.tunnel_id, Direction::Outbound, packet.size as u64);
        Ok(protected)
    }

    /// Decrypt a protected packet through the inbound SA matching its SPI
    pub fn decrypt_packet(&self, packet: &ProtectedPacket) -> Result<PacketDescriptor> {
        let tunnel_id = self
            .ipsec
            .get(packet.spi)
            .map(|sa| sa.tunnel_id);

        let inner = self.ipsec.decapsulate(packet)?;
        if let Some(tunnel_id) = tunnel_id {
            self.note_traffic(tunnel_id, Direction::Inbound, inner.size as u64);
        }
        Ok(inner)
    }

    /// Run one simulated liveness probe
    ///
    /// An established, responsive peer answers; anything else counts as a
    /// missed probe. A peer that exhausts its retries is declared dead and
    /// the tunnel drops to `Error`. Returns whether the peer is still
    /// considered alive.
    pub fn dpd_probe(&self, id: TunnelId) -> Result<bool> {
        let dead = {
            let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
            let tunnel = tunnels.get_mut(&id).ok_or(Error::TunnelNotFound(id))?;

            if tunnel.state.is_active() && tunnel.peer_responsive {
                tunnel.dpd.mark_alive();
                tunnel.last_activity = Some(SystemTime::now());
            } else {
                tunnel.dpd.mark_missed();
            }
            tunnel.dpd.is_dead(&self.config.dpd)
        };

        if dead {
            warn!(tunnel_id = id, "dead peer detected");
            let _ = self.set_state(id, TunnelState::Error);
        }
        Ok(!dead)
    }

    /// Simulation switch: make the peer stop (or resume) answering probes
    pub fn set_peer_responsive(&self, id: TunnelId, responsive: bool) -> Result<()> {
        let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
        let tunnel = tunnels.get_mut(&id).ok_or(Error::TunnelNotFound(id))?;
        tunnel.peer_responsive = responsive;
        Ok(())
    }

    /// Look up a tunnel by id
    pub fn get_tunnel(&self, id: TunnelId) -> Option<VpnTunnel> {
        self.tunnels
            .lock()
            .expect("tunnel registry poisoned")
            .get(&id)
            .cloned()
    }

    /// All tunnel records, unordered
    pub fn list_tunnels(&self) -> Vec<VpnTunnel> {
        self.tunnels
            .lock()
            .expect("tunnel registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Transition a tunnel, maintaining the active gauge and publishing the
    /// state event. Returns the updated record.
    fn set_state(&self, id: TunnelId, new: TunnelState) -> Result<VpnTunnel> {
        let (old, snapshot) = {
            let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
            let tunnel = tunnels.get_mut(&id).ok_or(Error::TunnelNotFound(id))?;
            let old = tunnel.state;
            if old == new {
                return Ok(tunnel.clone());
            }
            tunnel.state = new;
            (old, tunnel.clone())
        };

        match (old.is_active(), new.is_active()) {
            (false, true) => self.metrics.record_tunnel_up(),
            (true, false) => self.metrics.record_tunnel_down(),
            _ => {}
        }

        self.events.publish(
            EventKind::TunnelState,
            format!(
                "tunnel \"{}\" {} -> {}",
                snapshot.name,
                old.as_str(),
                new.as_str()
            ),
            EventDetails::tunnel(id),
        );
        info!(
            tunnel_id = id,
            from = old.as_str(),
            to = new.as_str(),
            "tunnel state changed"
        );
        Ok(snapshot)
    }

    /// Update per-tunnel counters and liveness after a packet operation
    fn note_traffic(&self, id: TunnelId, direction: Direction, bytes: u64) {
        let mut tunnels = self.tunnels.lock().expect("tunnel registry poisoned");
        if let Some(tunnel) = tunnels.get_mut(&id) {
            match direction {
                Direction::Outbound => {
                    tunnel.counters.packets_out += 1;
                    tunnel.counters.bytes_out += bytes;
                }
                Direction::Inbound => {
                    tunnel.counters.packets_in += 1;
                    tunnel.counters.bytes_in += bytes;
                }
            }
            tunnel.last_activity = Some(SystemTime::now());
            tunnel.dpd.mark_alive();
        }
    }
}
