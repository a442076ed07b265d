//! IKE engine: simulated phase-1 negotiation and IKE SA lifecycle
//!
//! The engine drives the ordered exchange
//!
//! ```text
//! Init
//!   ↓ (SA_INIT proposal sent / response received)
//! SaInitSent
//!   ↓ (AUTH request sent / pre-shared key verified)
//! AuthSent
//!   ↓
//! Established ⇄ Rekeying
//!   ↓
//! Deleted
//! ```
//!
//! Phases are irreversible and strictly ordered; each boundary is an awaited
//! step so callers' event loops are never stalled. Between phases the engine
//! holds no locks: every phase result is committed by re-locking the
//! registry and verifying the SA still exists in the expected state, which
//! makes mid-negotiation deletion safe — a cancelled negotiation can never
//! resurrect its SA.
//!
//! Negotiations are serialized per tunnel: a second `initiate` or `rekey`
//! for a tunnel with an exchange already in flight is rejected, so two IKE
//! SAs can never race for one tunnel.

use crate::config::PresharedKey;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventDetails, EventDirection, EventKind, NegotiationPhase};
use crate::metrics::EngineMetrics;
use crate::proposal::IkeProposal;
use crate::{IkeSaId, TunnelId};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// IKE SA state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IkeSaState {
    /// Created, nothing exchanged yet
    Init,
    /// SA_INIT exchange completed
    SaInitSent,
    /// AUTH exchange completed, awaiting final confirmation
    AuthSent,
    /// Negotiation finished; IPSec SA derivation permitted
    Established,
    /// Abbreviated rekey exchange in progress
    Rekeying,
    /// Terminal state
    Deleted,
}

impl IkeSaState {
    /// Check whether `next` is a legal successor state
    pub fn can_transition_to(&self, next: IkeSaState) -> bool {
        use IkeSaState::*;

        match (self, next) {
            (Init, SaInitSent) => true,
            (SaInitSent, AuthSent) => true,
            (AuthSent, Established) => true,
            (Established, Rekeying) => true,
            (Rekeying, Established) => true,
            // Deletion is allowed from any live state
            (_, Deleted) => true,
            _ => false,
        }
    }

    /// Terminal check
    pub fn is_terminal(&self) -> bool {
        matches!(self, IkeSaState::Deleted)
    }

    /// Only established SAs may derive IPSec SAs
    pub fn is_established(&self) -> bool {
        matches!(self, IkeSaState::Established)
    }

    /// Lowercase label used in events and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            IkeSaState::Init => "init",
            IkeSaState::SaInitSent => "sa_init_sent",
            IkeSaState::AuthSent => "auth_sent",
            IkeSaState::Established => "established",
            IkeSaState::Rekeying => "rekeying",
            IkeSaState::Deleted => "deleted",
        }
    }
}

/// One phase-1 security association
#[derive(Debug, Clone)]
pub struct IkeSa {
    /// Unique SA id
    pub id: IkeSaId,
    /// Owning tunnel
    pub tunnel_id: TunnelId,
    /// Local gateway address
    pub local_ip: Ipv4Addr,
    /// Remote gateway address
    pub remote_ip: Ipv4Addr,
    /// Negotiated proposal (immutable once selected)
    pub proposal: IkeProposal,
    /// Current state
    pub state: IkeSaState,
    /// Creation time
    pub created_at: SystemTime,
    /// Time the SA reached `Established`
    pub established_at: Option<SystemTime>,
}

/// Removes the tunnel from the in-flight set when the exchange ends,
/// including when the negotiation future is dropped mid-await.
struct FlightGuard<'a> {
    tunnel_id: TunnelId,
    in_flight: &'a Mutex<HashSet<TunnelId>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.tunnel_id);
    }
}

/// Simulated IKE negotiation engine
///
/// Owns the IKE SA registry. All mutation goes through the public
/// operations; event consumers only observe.
pub struct IkeEngine {
    phase_delay: Duration,
    min_psk_len: usize,
    sas: Mutex<HashMap<IkeSaId, IkeSa>>,
    in_flight: Mutex<HashSet<TunnelId>>,
    next_id: AtomicU64,
    events: Arc<EventBus>,
    metrics: EngineMetrics,
}

impl IkeEngine {
    /// Create an engine publishing to `events` and counting into `metrics`
    pub fn new(
        phase_delay: Duration,
        min_psk_len: usize,
        events: Arc<EventBus>,
        metrics: EngineMetrics,
    ) -> Self {
        IkeEngine {
            phase_delay,
            min_psk_len,
            sas: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            events,
            metrics,
        }
    }

    /// Run phase-1 negotiation for `tunnel_id`
    ///
    /// Returns the established SA. On authentication failure no SA remains
    /// in the registry.
    ///
    /// # Errors
    ///
    /// - [`Error::NegotiationInProgress`] if an exchange for this tunnel is
    ///   already in flight
    /// - [`Error::AuthenticationFailed`] if the pre-shared key is rejected
    /// - [`Error::Cancelled`] if the SA was deleted mid-negotiation
    pub async fn initiate(
        &self,
        tunnel_id: TunnelId,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        proposal: IkeProposal,
        psk: &PresharedKey,
    ) -> Result<IkeSa> {
        let _guard = self.begin_exchange(tunnel_id)?;

        self.metrics.record_negotiation_started();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        info!(
            ike_sa_id = id,
            tunnel_id,
            local = %local_ip,
            remote = %remote_ip,
            proposal = %proposal.summary(),
            "IKE negotiation started"
        );

        {
            let mut sas = self.sas.lock().expect("IKE registry poisoned");
            sas.insert(
                id,
                IkeSa {
                    id,
                    tunnel_id,
                    local_ip,
                    remote_ip,
                    proposal: proposal.clone(),
                    state: IkeSaState::Init,
                    created_at: SystemTime::now(),
                    established_at: None,
                },
            );
        }
        self.metrics.record_ike_sa_created();

        // Phase 1: SA_INIT (propose and accept algorithms)
        self.emit_phase(
            NegotiationPhase::SaInit,
            EventDirection::Sent,
            format!("SA_INIT proposal sent ({})", proposal.summary()),
            tunnel_id,
            id,
        );
        self.pause().await;
        if let Err(e) = self.commit(id, IkeSaState::SaInitSent) {
            return Err(self.fail_negotiation(id, tunnel_id, e));
        }
        self.emit_phase(
            NegotiationPhase::SaInit,
            EventDirection::Received,
            "SA_INIT response received: proposal accepted".to_string(),
            tunnel_id,
            id,
        );

        // Phase 2: AUTH (verify the pre-shared key)
        self.emit_phase(
            NegotiationPhase::Auth,
            EventDirection::Sent,
            format!("AUTH request sent (PSK fingerprint {})", psk.fingerprint()),
            tunnel_id,
            id,
        );
        self.pause().await;

        if !psk.meets_policy(self.min_psk_len) {
            self.metrics.record_auth_failure();
            let err = Error::AuthenticationFailed(format!(
                "pre-shared key rejected (fingerprint {})",
                psk.fingerprint()
            ));
            return Err(self.fail_negotiation(id, tunnel_id, err));
        }

        if let Err(e) = self.commit(id, IkeSaState::AuthSent) {
            return Err(self.fail_negotiation(id, tunnel_id, e));
        }
        self.emit_phase(
            NegotiationPhase::Auth,
            EventDirection::Received,
            "AUTH response received: peer verified".to_string(),
            tunnel_id,
            id,
        );

        // Final commit: ESTABLISHED
        self.pause().await;
        let sa = match self.commit(id, IkeSaState::Established) {
            Ok(sa) => sa,
            Err(e) => return Err(self.fail_negotiation(id, tunnel_id, e)),
        };

        self.metrics.record_negotiation_completed();
        self.events.publish(
            EventKind::SaEstablished,
            format!("IKE SA established for tunnel {}", tunnel_id),
            EventDetails::ike_sa(tunnel_id, id),
        );
        info!(ike_sa_id = id, tunnel_id, "IKE SA established");

        Ok(sa)
    }

    /// Run an abbreviated rekey for an established SA
    ///
    /// The old SA is superseded in place: its entry is replaced by a fresh
    /// SA (new id, same tunnel, addresses, and proposal) already in the
    /// `Established` state. IPSec SA identities are not touched here; the
    /// caller re-parents them.
    pub async fn rekey(&self, sa_id: IkeSaId, tunnel_id: TunnelId) -> Result<IkeSa> {
        let _guard = self.begin_exchange(tunnel_id)?;

        // Mark the SA as rekeying before the exchange pause
        {
            let mut sas = self.sas.lock().expect("IKE registry poisoned");
            let sa = sas
                .get_mut(&sa_id)
                .ok_or_else(|| Error::SaNotFound(format!("IKE SA {}", sa_id)))?;
            if sa.tunnel_id != tunnel_id {
                return Err(Error::InvalidParameter(format!(
                    "IKE SA {} belongs to tunnel {}, not {}",
                    sa_id, sa.tunnel_id, tunnel_id
                )));
            }
            if sa.state != IkeSaState::Established {
                return Err(Error::InvalidState(format!(
                    "cannot rekey IKE SA in state {}",
                    sa.state.as_str()
                )));
            }
            sa.state = IkeSaState::Rekeying;
        }

        self.emit_phase(
            NegotiationPhase::Rekey,
            EventDirection::Sent,
            "rekey exchange initiated (reusing negotiated proposal)".to_string(),
            tunnel_id,
            sa_id,
        );
        self.pause().await;

        // Commit: the old SA must still be present and rekeying
        let new_sa = {
            let mut sas = self.sas.lock().expect("IKE registry poisoned");
            let old = match sas.remove(&sa_id) {
                Some(sa) => sa,
                None => {
                    return Err(Error::Cancelled(format!(
                        "IKE SA {} deleted during rekey",
                        sa_id
                    )))
                }
            };
            debug_assert_eq!(old.state, IkeSaState::Rekeying);

            let now = SystemTime::now();
            let new_sa = IkeSa {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                tunnel_id,
                local_ip: old.local_ip,
                remote_ip: old.remote_ip,
                proposal: old.proposal,
                state: IkeSaState::Established,
                created_at: now,
                established_at: Some(now),
            };
            sas.insert(new_sa.id, new_sa.clone());
            new_sa
        };

        self.metrics.record_rekey();
        self.emit_phase(
            NegotiationPhase::Rekey,
            EventDirection::Received,
            format!("rekey completed: IKE SA {} superseded by {}", sa_id, new_sa.id),
            tunnel_id,
            new_sa.id,
        );
        self.events.publish(
            EventKind::SaEstablished,
            format!("IKE SA {} established by rekey for tunnel {}", new_sa.id, tunnel_id),
            EventDetails::ike_sa(tunnel_id, new_sa.id),
        );
        info!(old_sa = sa_id, new_sa = new_sa.id, tunnel_id, "IKE SA rekeyed");

        Ok(new_sa)
    }

    /// Delete an SA immediately; idempotent
    ///
    /// Returns `true` when an SA was actually removed. Any negotiation still
    /// in flight for the SA will abort at its next commit point.
    pub fn delete(&self, sa_id: IkeSaId) -> bool {
        let removed = self
            .sas
            .lock()
            .expect("IKE registry poisoned")
            .remove(&sa_id);

        match removed {
            Some(sa) => {
                self.metrics.record_ike_sa_deleted();
                self.events.publish(
                    EventKind::SaDeleted,
                    format!("IKE SA {} deleted", sa_id),
                    EventDetails::ike_sa(sa.tunnel_id, sa_id),
                );
                info!(ike_sa_id = sa_id, tunnel_id = sa.tunnel_id, "IKE SA deleted");
                true
            }
            None => false,
        }
    }

    /// Delete every SA belonging to `tunnel_id`, committed or mid-negotiation
    ///
    /// Returns the removed SA ids so the caller can cascade further.
    pub fn delete_for_tunnel(&self, tunnel_id: TunnelId) -> Vec<IkeSaId> {
        let doomed: Vec<IkeSaId> = {
            let sas = self.sas.lock().expect("IKE registry poisoned");
            sas.values()
                .filter(|sa| sa.tunnel_id == tunnel_id)
                .map(|sa| sa.id)
                .collect()
        };

        doomed
            .into_iter()
            .filter(|sa_id| self.delete(*sa_id))
            .collect()
    }

    /// Look up an SA by id
    pub fn get(&self, sa_id: IkeSaId) -> Option<IkeSa> {
        self.sas
            .lock()
            .expect("IKE registry poisoned")
            .get(&sa_id)
            .cloned()
    }

    /// Number of SAs currently in the registry
    pub fn active_count(&self) -> usize {
        self.sas.lock().expect("IKE registry poisoned").len()
    }

    /// Reserve the per-tunnel exchange slot
    fn begin_exchange(&self, tunnel_id: TunnelId) -> Result<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
        if !in_flight.insert(tunnel_id) {
            return Err(Error::NegotiationInProgress(tunnel_id));
        }
        Ok(FlightGuard {
            tunnel_id,
            in_flight: &self.in_flight,
        })
    }

    /// Simulated exchange latency between phases
    async fn pause(&self) {
        if !self.phase_delay.is_zero() {
            tokio::time::sleep(self.phase_delay).await;
        }
    }

    /// Commit a phase result: the SA must still exist and accept the
    /// transition. Stamps `established_at` when entering `Established`.
    fn commit(&self, sa_id: IkeSaId, next: IkeSaState) -> Result<IkeSa> {
        let mut sas = self.sas.lock().expect("IKE registry poisoned");
        let sa = sas.get_mut(&sa_id).ok_or_else(|| {
            Error::Cancelled(format!("IKE SA {} deleted during negotiation", sa_id))
        })?;

        if !sa.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: sa.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        sa.state = next;
        if next == IkeSaState::Established {
            sa.established_at = Some(SystemTime::now());
        }
        Ok(sa.clone())
    }

    /// Tear down a failed or cancelled negotiation: remove any residual SA,
    /// bump the failure counter, and publish the failure event.
    fn fail_negotiation(&self, sa_id: IkeSaId, tunnel_id: TunnelId, err: Error) -> Error {
        let removed = self
            .sas
            .lock()
            .expect("IKE registry poisoned")
            .remove(&sa_id)
            .is_some();
        if removed {
            self.metrics.record_ike_sa_deleted();
        }

        self.metrics.record_negotiation_failed();
        self.events.publish(
            EventKind::NegotiationFailed,
            format!("IKE negotiation failed: {}", err),
            EventDetails::ike_sa(tunnel_id, sa_id),
        );
        warn!(ike_sa_id = sa_id, tunnel_id, error = %err, "IKE negotiation failed");
        err
    }

    /// Publish one negotiation-phase event
    fn emit_phase(
        &self,
        phase: NegotiationPhase,
        direction: EventDirection,
        message: String,
        tunnel_id: TunnelId,
        sa_id: IkeSaId,
    ) {
        self.events.publish(
            EventKind::Negotiation { phase, direction },
            message,
            EventDetails::ike_sa(tunnel_id, sa_id),
        );
    }
}
