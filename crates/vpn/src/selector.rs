//! Traffic selectors
//!
//! A traffic selector decides which packets an IPSec SA protects. Selectors
//! hold a pair of IPv4 networks (local and remote side) plus optional port
//! and protocol constraints, and are matched against a packet 5-tuple in a
//! given direction.
//!
//! Selector specificity drives SA lookup tie-breaks: longer prefixes and
//! present port/protocol constraints score higher.

use crate::error::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Network {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Network {
    /// Create a network, normalizing the address to its network address
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `prefix_len > 32`.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidParameter(format!(
                "prefix length {} out of range",
                prefix_len
            )));
        }
        let network = u32::from(addr) & Self::mask(prefix_len);
        Ok(Ipv4Network {
            addr: Ipv4Addr::from(network),
            prefix_len,
        })
    }

    /// The 0.0.0.0/0 wildcard network
    pub fn any() -> Self {
        Ipv4Network {
            addr: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
        }
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    /// Network address
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check whether `ip` falls inside this network
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix_len) == u32::from(self.addr)
    }
}

impl FromStr for Ipv4Network {
    type Err = Error;

    /// Parse `"a.b.c.d/len"`; a bare address is treated as a /32 host
    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, len_part) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };

        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("bad IPv4 address: {}", addr_part)))?;

        let prefix_len = match len_part {
            Some(l) => l
                .parse::<u8>()
                .map_err(|_| Error::InvalidParameter(format!("bad prefix length: {}", l)))?,
            None => 32,
        };

        Ipv4Network::new(addr, prefix_len)
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Traffic direction relative to the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Traffic arriving from the peer
    Inbound,
    /// Traffic leaving toward the peer
    Outbound,
}

impl Direction {
    /// Lowercase label used in events and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector describing which traffic an SA protects
///
/// `local_net`/`remote_net` are interpreted relative to the local endpoint:
/// outbound traffic must flow `local_net -> remote_net`, inbound traffic
/// `remote_net -> local_net`. `None` port/protocol constraints are
/// wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelector {
    /// Network behind the local endpoint
    pub local_net: Ipv4Network,
    /// Network behind the remote endpoint
    pub remote_net: Ipv4Network,
    /// IP protocol constraint (e.g. 6 for TCP, 17 for UDP)
    pub protocol: Option<u8>,
    /// Local-side port constraint
    pub local_port: Option<u16>,
    /// Remote-side port constraint
    pub remote_port: Option<u16>,
}

impl TrafficSelector {
    /// Selector covering a pair of networks with wildcard ports/protocol
    pub fn between(local_net: Ipv4Network, remote_net: Ipv4Network) -> Self {
        TrafficSelector {
            local_net,
            remote_net,
            protocol: None,
            local_port: None,
            remote_port: None,
        }
    }

    /// Selector matching all traffic
    pub fn any() -> Self {
        Self::between(Ipv4Network::any(), Ipv4Network::any())
    }

    /// Constrain the IP protocol
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Constrain local and remote ports
    pub fn with_ports(mut self, local_port: u16, remote_port: u16) -> Self {
        self.local_port = Some(local_port);
        self.remote_port = Some(remote_port);
        self
    }

    /// Match a packet 5-tuple against this selector in `direction`
    pub fn matches(
        &self,
        source: Ipv4Addr,
        dest: Ipv4Addr,
        protocol: u8,
        source_port: Option<u16>,
        dest_port: Option<u16>,
        direction: Direction,
    ) -> bool {
        if let Some(p) = self.protocol {
            if p != protocol {
                return false;
            }
        }

        let (src_net, dst_net, src_constraint, dst_constraint) = match direction {
            Direction::Outbound => (
                &self.local_net,
                &self.remote_net,
                self.local_port,
                self.remote_port,
            ),
            Direction::Inbound => (
                &self.remote_net,
                &self.local_net,
                self.remote_port,
                self.local_port,
            ),
        };

        if !src_net.contains(source) || !dst_net.contains(dest) {
            return false;
        }

        let port_ok = |constraint: Option<u16>, port: Option<u16>| match constraint {
            None => true,
            Some(want) => port == Some(want),
        };

        port_ok(src_constraint, source_port) && port_ok(dst_constraint, dest_port)
    }

    /// Specificity score for lookup tie-breaks
    ///
    /// Longer prefixes dominate; a present port or protocol constraint adds
    /// a fixed bonus so `/24 + port` outranks a bare `/24`.
    pub fn specificity(&self) -> u32 {
        let mut score =
            u32::from(self.local_net.prefix_len()) + u32::from(self.remote_net.prefix_len());
        if self.protocol.is_some() {
            score += 1;
        }
        if self.local_port.is_some() {
            score += 1;
        }
        if self.remote_port.is_some() {
            score += 1;
        }
        score
    }
}

impl fmt::Display for TrafficSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local_net, self.remote_net)
    }
}
