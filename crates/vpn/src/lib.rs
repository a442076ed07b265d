//! Simulated IKE/IPSec negotiation and tunnel engine.
//!
//! This crate is the VPN core of a network-security teaching platform. It
//! *simulates* — rather than implements — the IKE and IPSec protocols:
//! security-association lifecycles, the multi-phase negotiation state
//! machine, anti-replay protected encapsulation, and rekeying, with every
//! observable action published as a typed event and counted in statistics.
//!
//! # Architecture
//!
//! ```text
//! TunnelManager (tunnel lifecycle: down → connecting → established)
//!   ├── IkeEngine   (phase-1 negotiation, IKE SA registry, rekey/delete)
//!   ├── IpsecEngine (SA pairs, ESP/AH encap/decap, anti-replay, selectors)
//!   ├── EventBus    (bounded history + broadcast fan-out)
//!   └── EngineMetrics (pull-based statistics snapshot)
//! ```
//!
//! Engines are explicit, constructed instances owned by the manager — there
//! are no global singletons, so independent simulations (one per lab
//! scenario, one per test) never share state.
//!
//! # Quick start
//!
//! ```no_run
//! use netlab_vpn::config::{Endpoint, TunnelParams};
//! use netlab_vpn::packet::PacketDescriptor;
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
//!
//!     let packet = PacketDescriptor::new(
//!         "192.168.1.5".parse()?,
//!         "192.168.10.9".parse()?,
//!         6,
//!         1400,
//!     );
//!     let protected = manager.encrypt_packet(&packet)?;
//!     println!(
//!         "tunnel {} protected seq {} under SPI 0x{:08x}",
//!         tunnel.name, protected.sequence, protected.spi
//!     );
//!
//!     println!("{:?}", manager.statistics());
//!     Ok(())
//! }
//! ```
//!
//! # Security
//!
//! This is a teaching simulation: no real key material is derived and no
//! wire bytes are produced. The contract is correctness of the simulated
//! state machines, SA bookkeeping, and encapsulation semantics — it must
//! never be used to protect real traffic.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dpd;
pub mod error;
pub mod event;
pub mod ike;
pub mod ipsec;
pub mod metrics;
pub mod packet;
pub mod proposal;
pub mod replay;
pub mod selector;
pub mod tunnel;

/// Tunnel identifier
pub type TunnelId = u64;

/// IKE SA identifier
pub type IkeSaId = u64;

/// Security Parameter Index of an IPSec SA
pub type Spi = u32;

// Re-export the types most consumers touch
pub use config::{Endpoint, PresharedKey, SimConfig, TunnelParams, TunnelType};
pub use error::{Error, Result};
pub use event::{Event, EventBus, EventKind};
pub use ike::{IkeEngine, IkeSa, IkeSaState};
pub use ipsec::{IpsecEngine, IpsecSa, SaPair};
pub use metrics::StatsSnapshot;
pub use packet::{PacketDescriptor, ProtectedPacket};
pub use proposal::{preset, IkeProposal, IpsecProposal};
pub use selector::{Direction, Ipv4Network, TrafficSelector};
pub use tunnel::{TunnelManager, TunnelState, VpnTunnel};
