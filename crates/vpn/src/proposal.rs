//! Proposal catalog for IKE and IPSec negotiation
//!
//! A proposal is an immutable named bundle of algorithm choices selected at
//! tunnel-creation time. The catalog ships three presets mirroring what the
//! lab exercises hand out:
//!
//! | preset       | IKE                              | IPSec                       |
//! |--------------|----------------------------------|-----------------------------|
//! | `balanced`   | AES-128 / SHA256 / group 14      | ESP tunnel AES-128 / SHA256 |
//! | `strong`     | AES-256 / SHA256 / group 19      | ESP tunnel AES-256 / SHA256 |
//! | `compatible` | 3DES / SHA1 / group 2            | ESP tunnel 3DES / SHA1      |
//!
//! Proposals are never mutated after selection; rekeying reuses the original
//! bundle.

use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;

/// Encryption algorithm choices recognized by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// AES with 128-bit key
    Aes128,
    /// AES with 256-bit key
    Aes256,
    /// Triple DES
    TripleDes,
}

impl EncryptionAlgorithm {
    /// Parse from a configuration string (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AES-128" | "AES128" => Some(EncryptionAlgorithm::Aes128),
            "AES-256" | "AES256" => Some(EncryptionAlgorithm::Aes256),
            "3DES" => Some(EncryptionAlgorithm::TripleDes),
            _ => None,
        }
    }

    /// Canonical configuration name
    pub fn as_name(self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes128 => "AES-128",
            EncryptionAlgorithm::Aes256 => "AES-256",
            EncryptionAlgorithm::TripleDes => "3DES",
        }
    }

    /// Cipher block size in bytes, used by the simulated padding model
    pub fn block_size(self) -> usize {
        match self {
            EncryptionAlgorithm::Aes128 | EncryptionAlgorithm::Aes256 => 16,
            EncryptionAlgorithm::TripleDes => 8,
        }
    }

    /// Simulated IV length in bytes
    pub fn iv_len(self) -> usize {
        self.block_size()
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Integrity / hash algorithm choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// MD5
    Md5,
}

impl HashAlgorithm {
    /// Parse from a configuration string (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Some(HashAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Some(HashAlgorithm::Sha256),
            "MD5" => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }

    /// Canonical configuration name
    pub fn as_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Md5 => "MD5",
        }
    }

    /// Simulated truncated ICV length in bytes
    pub fn icv_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 12,
            HashAlgorithm::Sha256 => 16,
            HashAlgorithm::Md5 => 12,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Diffie-Hellman group choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DhGroup {
    /// 1024-bit MODP
    Group2 = 2,
    /// 1536-bit MODP
    Group5 = 5,
    /// 2048-bit MODP
    Group14 = 14,
    /// 256-bit elliptic curve
    Group19 = 19,
}

impl DhGroup {
    /// Convert from the numeric group id
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(DhGroup::Group2),
            5 => Some(DhGroup::Group5),
            14 => Some(DhGroup::Group14),
            19 => Some(DhGroup::Group19),
            _ => None,
        }
    }

    /// Numeric group id
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// IPSec protection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpsecProtocol {
    /// Encapsulating Security Payload (confidentiality + integrity)
    Esp,
    /// Authentication Header (integrity only)
    Ah,
}

impl IpsecProtocol {
    /// Parse from a configuration string (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ESP" => Some(IpsecProtocol::Esp),
            "AH" => Some(IpsecProtocol::Ah),
            _ => None,
        }
    }

    /// Canonical configuration name
    pub fn as_name(self) -> &'static str {
        match self {
            IpsecProtocol::Esp => "ESP",
            IpsecProtocol::Ah => "AH",
        }
    }

    /// IP protocol number (50 for ESP, 51 for AH)
    pub fn ip_protocol(self) -> u8 {
        match self {
            IpsecProtocol::Esp => 50,
            IpsecProtocol::Ah => 51,
        }
    }
}

impl fmt::Display for IpsecProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Encapsulation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncapMode {
    /// Whole inner packet protected, new outer header
    Tunnel,
    /// Payload-only protection between the original endpoints
    Transport,
}

impl EncapMode {
    /// Parse from a configuration string (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tunnel" => Some(EncapMode::Tunnel),
            "transport" => Some(EncapMode::Transport),
            _ => None,
        }
    }

    /// Canonical configuration name
    pub fn as_name(self) -> &'static str {
        match self {
            EncapMode::Tunnel => "tunnel",
            EncapMode::Transport => "transport",
        }
    }
}

/// Phase-1 (IKE) proposal: algorithms for the key-exchange SA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeProposal {
    /// Encryption algorithm
    pub encryption: EncryptionAlgorithm,
    /// Integrity / PRF hash
    pub hash: HashAlgorithm,
    /// Diffie-Hellman group
    pub dh_group: DhGroup,
    /// SA lifetime
    pub lifetime: Duration,
}

impl IkeProposal {
    /// Create a proposal with a lifetime given in seconds
    pub fn new(
        encryption: EncryptionAlgorithm,
        hash: HashAlgorithm,
        dh_group: DhGroup,
        lifetime_seconds: u64,
    ) -> Self {
        IkeProposal {
            encryption,
            hash,
            dh_group,
            lifetime: Duration::from_secs(lifetime_seconds),
        }
    }

    /// Human-readable algorithm summary used in negotiation events
    pub fn summary(&self) -> String {
        format!(
            "{}/{}/group{}",
            self.encryption,
            self.hash,
            self.dh_group.to_u16()
        )
    }
}

/// Phase-2 (IPSec) proposal: algorithms for the traffic SAs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsecProposal {
    /// Encryption algorithm (ignored for AH)
    pub encryption: EncryptionAlgorithm,
    /// Integrity hash
    pub hash: HashAlgorithm,
    /// Protection protocol
    pub protocol: IpsecProtocol,
    /// Encapsulation mode
    pub mode: EncapMode,
    /// SA lifetime
    pub lifetime: Duration,
}

impl IpsecProposal {
    /// Create a proposal with a lifetime given in seconds
    pub fn new(
        encryption: EncryptionAlgorithm,
        hash: HashAlgorithm,
        protocol: IpsecProtocol,
        mode: EncapMode,
        lifetime_seconds: u64,
    ) -> Self {
        IpsecProposal {
            encryption,
            hash,
            protocol,
            mode,
            lifetime: Duration::from_secs(lifetime_seconds),
        }
    }

    /// Human-readable algorithm summary used in negotiation events
    pub fn summary(&self) -> String {
        format!(
            "{} {} {}/{}",
            self.protocol,
            self.mode.as_name(),
            self.encryption,
            self.hash
        )
    }
}

/// A named preset bundling one IKE and one IPSec proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalPreset {
    /// Preset name as exposed to configuration
    pub name: &'static str,
    /// Phase-1 proposal
    pub ike: IkeProposal,
    /// Phase-2 proposal
    pub ipsec: IpsecProposal,
}

/// Look up a preset by name (case-insensitive)
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for an unknown preset name.
pub fn preset(name: &str) -> Result<ProposalPreset> {
    match name.to_ascii_lowercase().as_str() {
        "balanced" => Ok(ProposalPreset {
            name: "balanced",
            ike: IkeProposal::new(
                EncryptionAlgorithm::Aes128,
                HashAlgorithm::Sha256,
                DhGroup::Group14,
                86_400,
            ),
            ipsec: IpsecProposal::new(
                EncryptionAlgorithm::Aes128,
                HashAlgorithm::Sha256,
                IpsecProtocol::Esp,
                EncapMode::Tunnel,
                3_600,
            ),
        }),
        "strong" => Ok(ProposalPreset {
            name: "strong",
            ike: IkeProposal::new(
                EncryptionAlgorithm::Aes256,
                HashAlgorithm::Sha256,
                DhGroup::Group19,
                43_200,
            ),
            ipsec: IpsecProposal::new(
                EncryptionAlgorithm::Aes256,
                HashAlgorithm::Sha256,
                IpsecProtocol::Esp,
                EncapMode::Tunnel,
                3_600,
            ),
        }),
        "compatible" => Ok(ProposalPreset {
            name: "compatible",
            ike: IkeProposal::new(
                EncryptionAlgorithm::TripleDes,
                HashAlgorithm::Sha1,
                DhGroup::Group2,
                86_400,
            ),
            ipsec: IpsecProposal::new(
                EncryptionAlgorithm::TripleDes,
                HashAlgorithm::Sha1,
                IpsecProtocol::Esp,
                EncapMode::Tunnel,
                28_800,
            ),
        }),
        other => Err(Error::InvalidParameter(format!(
            "unknown proposal preset: {}",
            other
        ))),
    }
}

/// Names of all shipped presets
pub fn preset_names() -> &'static [&'static str] {
    &["balanced", "strong", "compatible"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_round_trip() {
        for name in ["AES-128", "AES-256", "3DES"] {
            let alg = EncryptionAlgorithm::from_name(name).unwrap();
            assert_eq!(alg.as_name(), name);
        }
        assert!(EncryptionAlgorithm::from_name("DES").is_none());
    }

    #[test]
    fn test_hash_round_trip() {
        for name in ["SHA1", "SHA256", "MD5"] {
            let alg = HashAlgorithm::from_name(name).unwrap();
            assert_eq!(alg.as_name(), name);
        }
        assert!(HashAlgorithm::from_name("SHA512").is_none());
    }

    #[test]
    fn test_dh_group_values() {
        assert_eq!(DhGroup::from_u16(14), Some(DhGroup::Group14));
        assert_eq!(DhGroup::Group19.to_u16(), 19);
        assert!(DhGroup::from_u16(1).is_none());
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(IpsecProtocol::Esp.ip_protocol(), 50);
        assert_eq!(IpsecProtocol::Ah.ip_protocol(), 51);
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(EncryptionAlgorithm::Aes128.block_size(), 16);
        assert_eq!(EncryptionAlgorithm::Aes256.block_size(), 16);
        assert_eq!(EncryptionAlgorithm::TripleDes.block_size(), 8);
    }

    #[test]
    fn test_preset_balanced() {
        let p = preset("balanced").unwrap();
        assert_eq!(p.ike.encryption, EncryptionAlgorithm::Aes128);
        assert_eq!(p.ike.dh_group, DhGroup::Group14);
        assert_eq!(p.ike.lifetime, Duration::from_secs(86_400));
        assert_eq!(p.ipsec.protocol, IpsecProtocol::Esp);
        assert_eq!(p.ipsec.mode, EncapMode::Tunnel);
    }

    #[test]
    fn test_preset_case_insensitive() {
        assert_eq!(preset("Strong").unwrap().name, "strong");
        assert_eq!(preset("COMPATIBLE").unwrap().name, "compatible");
    }

    #[test]
    fn test_preset_unknown() {
        let err = preset("paranoid").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_all_preset_names_resolve() {
        for name in preset_names() {
            assert!(preset(name).is_ok(), "preset {} must resolve", name);
        }
    }

    #[test]
    fn test_proposal_summary() {
        let p = preset("balanced").unwrap();
        assert_eq!(p.ike.summary(), "AES-128/SHA256/group14");
        assert_eq!(p.ipsec.summary(), "ESP tunnel AES-128/SHA256");
    }
}
