//! Typed engine events
//!
//! Engines publish every observable action (negotiation phases, SA
//! lifecycle, packet protection, replay rejections, tunnel transitions) as
//! an [`Event`]. Events ride a bounded [`tokio::sync::broadcast`] channel to
//! live subscribers and are mirrored into a capped in-memory history, so
//! consumers can either stream or pull.
//!
//! Consumers never mutate engine state in response to an event; all
//! mutation goes through the engines' public operations.
//!
//! # Example
//!
//! ```
//! use netlab_vpn::event::{EventBus, EventDetails, EventKind};
//!
//! let bus = EventBus::default();
//! bus.publish(
//!     EventKind::ReplayBlocked,
//!     "replayed packet rejected".to_string(),
//!     EventDetails::default(),
//! );
//! assert_eq!(bus.history().len(), 1);
//! assert_eq!(bus.history()[0].kind.label(), "replay:blocked");
//! ```

use crate::{IkeSaId, Spi, TunnelId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// Default capacity of the retained event history
pub const DEFAULT_HISTORY_CAP: usize = 256;

/// Default capacity of the broadcast channel
pub const DEFAULT_CHANNEL_CAP: usize = 128;

/// Negotiation phase named in phase events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPhase {
    /// Algorithm proposal exchange
    SaInit,
    /// Pre-shared-key verification exchange
    Auth,
    /// Abbreviated rekey exchange
    Rekey,
}

impl NegotiationPhase {
    /// Lowercase label used in event types
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationPhase::SaInit => "sa_init",
            NegotiationPhase::Auth => "auth",
            NegotiationPhase::Rekey => "rekey",
        }
    }
}

/// Direction of a negotiation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDirection {
    /// Message left the local endpoint
    Sent,
    /// Message arrived from the peer
    Received,
}

impl EventDirection {
    /// Lowercase label used in event types
    pub fn as_str(self) -> &'static str {
        match self {
            EventDirection::Sent => "sent",
            EventDirection::Received => "received",
        }
    }
}

/// Typed event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A negotiation phase message was sent or received
    Negotiation {
        /// Phase the message belongs to
        phase: NegotiationPhase,
        /// Message direction
        direction: EventDirection,
    },
    /// A negotiation ended without establishing an SA
    NegotiationFailed,
    /// An IKE SA reached the established state
    SaEstablished,
    /// An SA was deleted
    SaDeleted,
    /// A packet was encapsulated
    PacketEncrypted,
    /// A packet was decapsulated
    PacketDecrypted,
    /// A packet was rejected by anti-replay
    ReplayBlocked,
    /// A tunnel changed state
    TunnelState,
}

impl EventKind {
    /// Colon-separated type label (e.g. `negotiation:sa_init:sent`)
    pub fn label(&self) -> String {
        match self {
            EventKind::Negotiation { phase, direction } => {
                format!("negotiation:{}:{}", phase.as_str(), direction.as_str())
            }
            EventKind::NegotiationFailed => "negotiation:failed".to_string(),
            EventKind::SaEstablished => "sa:established".to_string(),
            EventKind::SaDeleted => "sa:deleted".to_string(),
            EventKind::PacketEncrypted => "packet:encrypted".to_string(),
            EventKind::PacketDecrypted => "packet:decrypted".to_string(),
            EventKind::ReplayBlocked => "replay:blocked".to_string(),
            EventKind::TunnelState => "tunnel:state".to_string(),
        }
    }
}

/// Structured context attached to an event
///
/// Absent fields simply do not apply to the event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDetails {
    /// Owning tunnel
    pub tunnel_id: Option<TunnelId>,
    /// IKE SA involved
    pub ike_sa_id: Option<IkeSaId>,
    /// IPSec SA involved
    pub spi: Option<Spi>,
    /// Packet sequence number
    pub sequence: Option<u64>,
    /// Payload size in bytes
    pub bytes: Option<u64>,
}

impl EventDetails {
    /// Details naming only a tunnel
    pub fn tunnel(tunnel_id: TunnelId) -> Self {
        EventDetails {
            tunnel_id: Some(tunnel_id),
            ..Default::default()
        }
    }

    /// Details naming a tunnel and its IKE SA
    pub fn ike_sa(tunnel_id: TunnelId, ike_sa_id: IkeSaId) -> Self {
        EventDetails {
            tunnel_id: Some(tunnel_id),
            ike_sa_id: Some(ike_sa_id),
            ..Default::default()
        }
    }

    /// Details for a packet event
    pub fn packet(spi: Spi, sequence: u64, bytes: u64) -> Self {
        EventDetails {
            spi: Some(spi),
            sequence: Some(sequence),
            bytes: Some(bytes),
            ..Default::default()
        }
    }
}

/// A single timestamped engine event
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotone event id
    pub id: u64,
    /// Typed kind
    pub kind: EventKind,
    /// Human-readable description
    pub message: String,
    /// Wall-clock emission time
    pub timestamp: SystemTime,
    /// Structured context
    pub details: EventDetails,
}

/// Bounded event channel plus capped history
///
/// Publishing never blocks: slow subscribers lag and drop the oldest
/// broadcast entries, and the history evicts from the front once the cap is
/// reached.
#[derive(Debug)]
pub struct EventBus {
    next_id: AtomicU64,
    history: Mutex<VecDeque<Event>>,
    history_cap: usize,
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP, DEFAULT_CHANNEL_CAP)
    }
}

impl EventBus {
    /// Create a bus with explicit history and channel capacities
    pub fn new(history_cap: usize, channel_cap: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_cap.max(1));
        EventBus {
            next_id: AtomicU64::new(1),
            history: Mutex::new(VecDeque::with_capacity(history_cap.min(1024))),
            history_cap: history_cap.max(1),
            tx,
        }
    }

    /// Publish an event to history and live subscribers
    pub fn publish(&self, kind: EventKind, message: String, details: EventDetails) -> Event {
        let event = Event {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            message,
            timestamp: SystemTime::now(),
            details,
        };

        {
            let mut history = self.history.lock().expect("event history poisoned");
            if history.len() == self.history_cap {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // A send error only means nobody is subscribed right now
        let _ = self.tx.send(event.clone());
        event
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Snapshot of the retained history, oldest first
    pub fn history(&self) -> Vec<Event> {
        self.history
            .lock()
            .expect("event history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Events of one kind currently retained
    pub fn history_of(&self, kind: EventKind) -> Vec<Event> {
        self.history
            .lock()
            .expect("event history poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Drop all retained history (subscribers are unaffected)
    pub fn clear_history(&self) {
        self.history.lock().expect("event history poisoned").clear();
    }
}
