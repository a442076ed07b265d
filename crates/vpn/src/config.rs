//! Engine configuration and tunnel parameters
//!
//! [`SimConfig`] tunes the simulation itself (phase pacing, key policy,
//! event capacities). [`TunnelParams`] describes one tunnel to create and is
//! assembled through a validating builder.

use crate::dpd::DpdConfig;
use crate::error::{Error, Result};
use crate::proposal::{preset, IkeProposal, IpsecProposal};
use crate::replay::DEFAULT_WINDOW_SIZE;
use crate::selector::Ipv4Network;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default simulated pause at each negotiation-phase boundary
pub const DEFAULT_PHASE_DELAY: Duration = Duration::from_millis(25);

/// Default minimum accepted pre-shared-key length in bytes
pub const DEFAULT_MIN_PSK_LEN: usize = 8;

/// Tuning knobs for the whole simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Pause inserted at each negotiation-phase boundary
    pub phase_delay: Duration,

    /// Minimum pre-shared-key length accepted by the simulated AUTH check
    pub min_psk_len: usize,

    /// Retained event-history capacity
    pub history_cap: usize,

    /// Broadcast channel capacity for live event subscribers
    pub channel_cap: usize,

    /// Anti-replay window span for inbound SAs
    pub replay_window_size: u32,

    /// Dead-peer-detection settings
    pub dpd: DpdConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            phase_delay: DEFAULT_PHASE_DELAY,
            min_psk_len: DEFAULT_MIN_PSK_LEN,
            history_cap: crate::event::DEFAULT_HISTORY_CAP,
            channel_cap: crate::event::DEFAULT_CHANNEL_CAP,
            replay_window_size: DEFAULT_WINDOW_SIZE,
            dpd: DpdConfig::default(),
        }
    }
}

impl SimConfig {
    /// Configuration with zero phase delays, for tests and batch runs
    pub fn immediate() -> Self {
        SimConfig {
            phase_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Pre-shared key with zeroized storage and masked display
///
/// The raw key never appears in logs or events; only the
/// [`fingerprint`](PresharedKey::fingerprint) does.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PresharedKey {
    key: Vec<u8>,
}

impl PresharedKey {
    /// Wrap a key
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        PresharedKey { key: key.into() }
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// True for a zero-length key
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Whether the key satisfies the simulated acceptance policy
    pub fn meets_policy(&self, min_len: usize) -> bool {
        self.key.len() >= min_len
    }

    /// Short SHA-256 fingerprint, safe to show in events and logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.key);
        hex::encode(&digest[..4])
    }

    /// Masked placeholder for UI display
    pub fn masked(&self) -> &'static str {
        "********"
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey({})", self.masked())
    }
}

/// Tunnel flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelType {
    /// Network-to-network tunnel between two gateways
    SiteToSite,
    /// Single client reaching a protected network
    RemoteAccess,
}

impl TunnelType {
    /// Configuration label
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelType::SiteToSite => "site-to-site",
            TunnelType::RemoteAccess => "remote-access",
        }
    }
}

/// One side of a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stable identifier (device or site id)
    pub id: String,
    /// Display name
    pub name: String,
    /// Public (outer) address
    pub public_ip: Ipv4Addr,
    /// Protected network behind this endpoint
    pub private_network: Ipv4Network,
}

impl Endpoint {
    /// Describe an endpoint
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        public_ip: Ipv4Addr,
        private_network: Ipv4Network,
    ) -> Self {
        Endpoint {
            id: id.into(),
            name: name.into(),
            public_ip,
            private_network,
        }
    }
}

/// Everything needed to create one tunnel
#[derive(Debug, Clone)]
pub struct TunnelParams {
    /// Tunnel display name
    pub name: String,
    /// Tunnel flavor
    pub tunnel_type: TunnelType,
    /// Local side
    pub local: Endpoint,
    /// Remote side
    pub remote: Endpoint,
    /// Phase-1 proposal
    pub ike_proposal: IkeProposal,
    /// Phase-2 proposal
    pub ipsec_proposal: IpsecProposal,
    /// Pre-shared key
    pub psk: PresharedKey,
}

impl TunnelParams {
    /// Start building tunnel parameters
    pub fn builder() -> TunnelParamsBuilder {
        TunnelParamsBuilder::default()
    }
}

/// Builder for [`TunnelParams`]
#[derive(Debug, Default)]
pub struct TunnelParamsBuilder {
    name: Option<String>,
    tunnel_type: Option<TunnelType>,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    ike_proposal: Option<IkeProposal>,
    ipsec_proposal: Option<IpsecProposal>,
    psk: Option<PresharedKey>,
}

impl TunnelParamsBuilder {
    /// Set the tunnel name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the tunnel flavor (defaults to site-to-site)
    pub fn with_type(mut self, tunnel_type: TunnelType) -> Self {
        self.tunnel_type = Some(tunnel_type);
        self
    }

    /// Set the local endpoint
    pub fn with_local(mut self, endpoint: Endpoint) -> Self {
        self.local = Some(endpoint);
        self
    }

    /// Set the remote endpoint
    pub fn with_remote(mut self, endpoint: Endpoint) -> Self {
        self.remote = Some(endpoint);
        self
    }

    /// Select both proposals from a named preset
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an unknown preset name.
    pub fn with_preset(mut self, name: &str) -> Result<Self> {
        let p = preset(name)?;
        self.ike_proposal = Some(p.ike);
        self.ipsec_proposal = Some(p.ipsec);
        Ok(self)
    }

    /// Set the phase-1 proposal explicitly
    pub fn with_ike_proposal(mut self, proposal: IkeProposal) -> Self {
        self.ike_proposal = Some(proposal);
        self
    }

    /// Set the phase-2 proposal explicitly
    pub fn with_ipsec_proposal(mut self, proposal: IpsecProposal) -> Self {
        self.ipsec_proposal = Some(proposal);
        self
    }

    /// Set the pre-shared key
    pub fn with_psk(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.psk = Some(PresharedKey::new(key));
        self
    }

    /// Validate and build
    ///
    /// Proposals default to the `balanced` preset when not chosen
    /// explicitly.
    pub fn build(self) -> Result<TunnelParams> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidParameter("tunnel name required".into()))?;
        let local = self
            .local
            .ok_or_else(|| Error::InvalidParameter("local endpoint required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| Error::InvalidParameter("remote endpoint required".into()))?;
        let psk = self
            .psk
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::InvalidParameter("pre-shared key required".into()))?;

        let default = preset("balanced").expect("balanced preset always exists");

        Ok(TunnelParams {
            name,
            tunnel_type: self.tunnel_type.unwrap_or(TunnelType::SiteToSite),
            local,
            remote,
            ike_proposal: self.ike_proposal.unwrap_or(default.ike),
            ipsec_proposal: self.ipsec_proposal.unwrap_or(default.ipsec),
            psk,
        })
    }
}
