//! Error types for the simulated VPN engine
//!
//! This module defines a unified error type for all engine operations,
//! covering IKE negotiation, IPSec SA management, and tunnel orchestration.
//!
//! # Taxonomy
//!
//! - Recoverable: [`Error::NegotiationFailed`], [`Error::SelectorMismatch`],
//!   [`Error::LifetimeExpired`] — the caller may retry, pick another SA, or
//!   trigger a rekey.
//! - Security-relevant: [`Error::ReplayDetected`] — reported via counter and
//!   event, never fatal to the engine.
//! - Caller errors: [`Error::SaNotFound`], [`Error::TunnelNotFound`] — clear
//!   failures instead of panics.

use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Simulated VPN engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Phase-1 negotiation failed (non-auth reason)
    NegotiationFailed(String),

    /// Pre-shared key verification failed during the AUTH phase
    AuthenticationFailed(String),

    /// A negotiation is already in flight for this tunnel
    NegotiationInProgress(u64),

    /// The SA was deleted while its negotiation was in flight
    Cancelled(String),

    /// No SA selector contains the described traffic
    SelectorMismatch(String),

    /// Replay attack detected
    ReplayDetected(u64),

    /// SA lifetime has expired
    LifetimeExpired(u32),

    /// Security Association not found
    SaNotFound(String),

    /// Tunnel not found
    TunnelNotFound(u64),

    /// Operation not valid in the current state
    InvalidState(String),

    /// State machine rejected a transition
    InvalidStateTransition {
        /// State the transition started from
        from: String,
        /// State the transition was aimed at
        to: String,
    },

    /// Invalid configuration or argument
    InvalidParameter(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NegotiationFailed(msg) => write!(f, "IKE negotiation failed: {}", msg),
            Error::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            Error::NegotiationInProgress(tunnel) => {
                write!(f, "Negotiation already in progress for tunnel {}", tunnel)
            }
            Error::Cancelled(msg) => write!(f, "Negotiation cancelled: {}", msg),
            Error::SelectorMismatch(msg) => {
                write!(f, "No SA selector matches: {}", msg)
            }
            Error::ReplayDetected(seq) => {
                write!(f, "Replay attack detected (sequence: {})", seq)
            }
            Error::LifetimeExpired(spi) => {
                write!(f, "SA lifetime expired (SPI: 0x{:08x})", spi)
            }
            Error::SaNotFound(id) => write!(f, "Security Association not found: {}", id),
            Error::TunnelNotFound(id) => write!(f, "Tunnel not found: {}", id),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidStateTransition { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AuthenticationFailed("key rejected".to_string());
        assert_eq!(err.to_string(), "Authentication failed: key rejected");

        let err = Error::ReplayDetected(42);
        assert_eq!(err.to_string(), "Replay attack detected (sequence: 42)");

        let err = Error::LifetimeExpired(0xDEADBEEF);
        assert_eq!(err.to_string(), "SA lifetime expired (SPI: 0xdeadbeef)");
    }

    #[test]
    fn test_transition_display() {
        let err = Error::InvalidStateTransition {
            from: "Init".to_string(),
            to: "Established".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid state transition: Init -> Established");
    }

    #[test]
    fn test_error_clone_eq() {
        let err1 = Error::NegotiationInProgress(7);
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
