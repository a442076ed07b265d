//! Dead-peer detection
//!
//! Tracks tunnel liveness for the simulation: traffic marks the peer alive,
//! probes are sent when the peer has been quiet for the configured interval,
//! and a peer that misses `max_retries` consecutive probes is declared dead.
//! The tunnel manager turns a dead verdict into a tunnel-down transition.

use std::time::{Duration, Instant};

/// Default interval between liveness probes
pub const DEFAULT_DPD_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of missed probes before a peer is declared dead
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Dead-peer-detection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpdConfig {
    /// Enable liveness probing
    pub enabled: bool,

    /// Quiet period after which a probe is due
    pub interval: Duration,

    /// Missed probes tolerated before declaring the peer dead
    pub max_retries: u32,
}

impl Default for DpdConfig {
    fn default() -> Self {
        DpdConfig {
            enabled: true,
            interval: DEFAULT_DPD_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DpdConfig {
    /// Configuration with probing turned off
    pub fn disabled() -> Self {
        DpdConfig {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Per-tunnel liveness state
#[derive(Debug, Clone)]
pub struct DpdState {
    /// Last time traffic (or a probe answer) proved the peer alive
    last_seen: Instant,

    /// Consecutive missed probes
    missed: u32,
}

impl Default for DpdState {
    fn default() -> Self {
        Self::new()
    }
}

impl DpdState {
    /// Fresh state; the peer counts as just seen
    pub fn new() -> Self {
        DpdState {
            last_seen: Instant::now(),
            missed: 0,
        }
    }

    /// Record proof of life (traffic or probe answer)
    pub fn mark_alive(&mut self) {
        self.last_seen = Instant::now();
        self.missed = 0;
    }

    /// Record a probe that went unanswered
    pub fn mark_missed(&mut self) {
        self.missed = self.missed.saturating_add(1);
    }

    /// Whether a probe is due under `config`
    pub fn probe_due(&self, config: &DpdConfig) -> bool {
        config.enabled && self.last_seen.elapsed() >= config.interval
    }

    /// Whether the peer is considered dead under `config`
    pub fn is_dead(&self, config: &DpdConfig) -> bool {
        config.enabled && self.missed >= config.max_retries
    }

    /// Consecutive missed probes so far
    pub fn missed(&self) -> u32 {
        self.missed
    }
}
