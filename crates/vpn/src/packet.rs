//! Simulated packet records
//!
//! The engine protects *descriptions* of packets, not bytes. A
//! [`PacketDescriptor`] carries the logical 5-tuple and payload size; a
//! [`ProtectedPacket`] is the record an encapsulation produces, referencing
//! the SA's SPI and stamped sequence number and carrying the original
//! descriptor for round-trip recovery.
//!
//! The simulated wire length is a deterministic function of the inner size
//! and the negotiated algorithms:
//!
//! ```text
//! ESP: 8 (header) + IV + payload padded to cipher block + 2 (trailer) + ICV
//! AH:  12 (header) + ICV + payload (no confidentiality, no padding)
//! ```

use crate::proposal::{IpsecProposal, IpsecProtocol};
use crate::Spi;
use std::net::Ipv4Addr;

/// ESP header length in bytes (SPI + sequence)
const ESP_HEADER_LEN: usize = 8;

/// ESP trailer length in bytes (pad length + next header)
const ESP_TRAILER_LEN: usize = 2;

/// AH fixed header length in bytes (next header, length, SPI, sequence)
const AH_HEADER_LEN: usize = 12;

/// Logical description of a cleartext packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Source address
    pub source: Ipv4Addr,
    /// Destination address
    pub dest: Ipv4Addr,
    /// IP protocol number (6 TCP, 17 UDP, 1 ICMP, ...)
    pub protocol: u8,
    /// Source port, if the protocol has ports
    pub source_port: Option<u16>,
    /// Destination port, if the protocol has ports
    pub dest_port: Option<u16>,
    /// Payload size in bytes
    pub size: usize,
}

impl PacketDescriptor {
    /// Describe a packet without port information
    pub fn new(source: Ipv4Addr, dest: Ipv4Addr, protocol: u8, size: usize) -> Self {
        PacketDescriptor {
            source,
            dest,
            protocol,
            source_port: None,
            dest_port: None,
            size,
        }
    }

    /// Attach source and destination ports
    pub fn with_ports(mut self, source_port: u16, dest_port: u16) -> Self {
        self.source_port = Some(source_port);
        self.dest_port = Some(dest_port);
        self
    }
}

/// Record of an encapsulated (ESP or AH) packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPacket {
    /// SPI of the SA that produced this packet
    pub spi: Spi,
    /// Stamped sequence number
    pub sequence: u64,
    /// Protection protocol applied
    pub protocol: IpsecProtocol,
    /// Original packet description, recovered on decapsulation
    pub inner: PacketDescriptor,
    /// Simulated on-the-wire length in bytes
    pub wire_len: usize,
}

impl ProtectedPacket {
    /// Build the protected record for `inner` under `proposal`
    pub fn encapsulate(
        spi: Spi,
        sequence: u64,
        proposal: &IpsecProposal,
        inner: PacketDescriptor,
    ) -> Self {
        let wire_len = wire_length(proposal, inner.size);
        ProtectedPacket {
            spi,
            sequence,
            protocol: proposal.protocol,
            inner,
            wire_len,
        }
    }

    /// Protection overhead added over the payload
    pub fn overhead(&self) -> usize {
        self.wire_len - self.inner.size
    }
}

/// Simulated wire length of a `payload_len`-byte payload under `proposal`
pub fn wire_length(proposal: &IpsecProposal, payload_len: usize) -> usize {
    match proposal.protocol {
        IpsecProtocol::Esp => {
            let block = proposal.encryption.block_size();
            // Payload plus trailer is padded up to the cipher block size
            let padded = (payload_len + ESP_TRAILER_LEN).div_ceil(block) * block;
            ESP_HEADER_LEN + proposal.encryption.iv_len() + padded + proposal.hash.icv_len()
        }
        IpsecProtocol::Ah => AH_HEADER_LEN + proposal.hash.icv_len() + payload_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{EncapMode, EncryptionAlgorithm, HashAlgorithm};

    fn esp_proposal() -> IpsecProposal {
        IpsecProposal::new(
            EncryptionAlgorithm::Aes128,
            HashAlgorithm::Sha256,
            IpsecProtocol::Esp,
            EncapMode::Tunnel,
            3600,
        )
    }

    fn ah_proposal() -> IpsecProposal {
        IpsecProposal::new(
            EncryptionAlgorithm::Aes128,
            HashAlgorithm::Sha1,
            IpsecProtocol::Ah,
            EncapMode::Transport,
            3600,
        )
    }

    #[test]
    fn test_descriptor_with_ports() {
        let pkt = PacketDescriptor::new(
            Ipv4Addr::new(192, 168, 1, 5),
            Ipv4Addr::new(192, 168, 10, 9),
            6,
            1400,
        )
        .with_ports(40000, 443);

        assert_eq!(pkt.source_port, Some(40000));
        assert_eq!(pkt.dest_port, Some(443));
        assert_eq!(pkt.size, 1400);
    }

    #[test]
    fn test_esp_wire_length_is_block_padded() {
        let proposal = esp_proposal();

        // 100 + 2 trailer = 102, padded to 112; 8 hdr + 16 iv + 112 + 16 icv
        assert_eq!(wire_length(&proposal, 100), 8 + 16 + 112 + 16);

        // Exact block fit: 14 + 2 = 16, no extra padding
        assert_eq!(wire_length(&proposal, 14), 8 + 16 + 16 + 16);
    }

    #[test]
    fn test_ah_wire_length_has_no_padding() {
        let proposal = ah_proposal();
        assert_eq!(wire_length(&proposal, 100), 12 + 12 + 100);
    }

    #[test]
    fn test_wire_length_monotone_in_payload() {
        let proposal = esp_proposal();
        let mut prev = 0;
        for size in [0, 1, 15, 16, 17, 100, 1400] {
            let len = wire_length(&proposal, size);
            assert!(len >= prev, "wire length must not shrink");
            assert!(len > size, "overhead must be positive");
            prev = len;
        }
    }

    #[test]
    fn test_encapsulate_preserves_inner() {
        let inner = PacketDescriptor::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 1),
            17,
            512,
        );
        let packet = ProtectedPacket::encapsulate(0xABCD1234, 7, &esp_proposal(), inner.clone());

        assert_eq!(packet.spi, 0xABCD1234);
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.protocol, IpsecProtocol::Esp);
        assert_eq!(packet.inner, inner);
        assert_eq!(packet.overhead(), packet.wire_len - 512);
    }
}
