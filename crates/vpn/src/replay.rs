//! Anti-replay protection for inbound IPSec SAs
//!
//! Each inbound SA carries a sliding window that tracks recently accepted
//! sequence numbers in a bitmap.
//!
//! # Simulated policy
//!
//! The teaching simulation uses a stricter policy than a production ESP
//! stack: the window's lower edge rides at the highest accepted sequence
//! number, so a packet only passes when it advances the window. A packet
//! that does not advance it is rejected and classified:
//!
//! - [`ReplayVerdict::Duplicate`] — the sequence number was already accepted
//!   within the window span (a true replay of a seen packet),
//! - [`ReplayVerdict::Stale`] — the sequence number sits at or below the
//!   window's lower bound and was never accepted (a late or forged packet).
//!
//! ```text
//! accepted: 5            then: 3        5        6
//!                              Stale    Dup      Accepted
//! window:   [..... 5]          (< 5)    (seen)   [..... 6]
//! ```
//!
//! Rejected packets never mutate the window.

/// Default window span tracked by the bitmap (packets)
pub const DEFAULT_WINDOW_SIZE: u32 = 64;

/// Minimum allowed window span
pub const MIN_WINDOW_SIZE: u32 = 32;

/// Maximum window span (bounded by the bitmap width)
pub const MAX_WINDOW_SIZE: u32 = 64;

/// Outcome of checking a sequence number against the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// Packet advances the window and is accepted
    Accepted,
    /// Sequence number was already accepted within the window span
    Duplicate,
    /// Sequence number at or below the window's lower bound
    Stale,
}

impl ReplayVerdict {
    /// True when the packet should be processed
    pub fn is_accepted(self) -> bool {
        matches!(self, ReplayVerdict::Accepted)
    }

    /// Short reason label used in replay events
    pub fn reason(self) -> &'static str {
        match self {
            ReplayVerdict::Accepted => "accepted",
            ReplayVerdict::Duplicate => "duplicate within window",
            ReplayVerdict::Stale => "below window lower bound",
        }
    }
}

/// Sliding anti-replay window
///
/// # Example
///
/// ```
/// use netlab_vpn::replay::{ReplayVerdict, ReplayWindow};
///
/// let mut window = ReplayWindow::default();
/// assert_eq!(window.check_and_update(5), ReplayVerdict::Accepted);
/// assert_eq!(window.check_and_update(3), ReplayVerdict::Stale);
/// assert_eq!(window.check_and_update(5), ReplayVerdict::Duplicate);
/// assert_eq!(window.check_and_update(6), ReplayVerdict::Accepted);
/// ```
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    /// Highest sequence number accepted so far (0 = nothing accepted)
    highest_seq: u64,

    /// Bitmap of accepted packets within the window span
    ///
    /// Bit 0 (LSB) = `highest_seq`, bit 1 = `highest_seq - 1`, and so on.
    bitmap: u64,

    /// Window span in packets
    window_size: u32,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl ReplayWindow {
    /// Create a window with the given span
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is outside
    /// [`MIN_WINDOW_SIZE`]..=[`MAX_WINDOW_SIZE`].
    pub fn new(window_size: u32) -> Self {
        assert!(
            (MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window_size),
            "Window size must be between {} and {}",
            MIN_WINDOW_SIZE,
            MAX_WINDOW_SIZE
        );

        ReplayWindow {
            highest_seq: 0,
            bitmap: 0,
            window_size,
        }
    }

    /// Check a sequence number and advance the window on acceptance
    ///
    /// Sequence number 0 is reserved and always rejected as [`ReplayVerdict::Stale`].
    /// Rejection never mutates the window.
    pub fn check_and_update(&mut self, seq: u64) -> ReplayVerdict {
        if seq == 0 {
            return ReplayVerdict::Stale;
        }

        // First packet establishes the window
        if self.highest_seq == 0 {
            self.highest_seq = seq;
            self.bitmap = 1;
            return ReplayVerdict::Accepted;
        }

        if seq > self.highest_seq {
            let shift = seq - self.highest_seq;
            if shift < 64 {
                self.bitmap <<= shift;
            } else {
                self.bitmap = 0;
            }
            self.bitmap |= 1;
            self.highest_seq = seq;
            return ReplayVerdict::Accepted;
        }

        // seq <= highest: the packet does not advance the window. Classify
        // the rejection so the emitted event names the real cause.
        let diff = self.highest_seq - seq;
        if diff < u64::from(self.window_size) && self.bitmap & (1u64 << diff) != 0 {
            ReplayVerdict::Duplicate
        } else {
            ReplayVerdict::Stale
        }
    }

    /// Highest sequence number accepted so far
    pub fn highest_seq(&self) -> u64 {
        self.highest_seq
    }

    /// Window span in packets
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Reset to the initial (empty) state
    pub fn reset(&mut self) {
        self.highest_seq = 0;
        self.bitmap = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_window_is_empty() {
        let window = ReplayWindow::new(64);
        assert_eq!(window.highest_seq(), 0);
        assert_eq!(window.window_size(), 64);
    }

    #[test]
    #[should_panic(expected = "Window size must be between")]
    fn test_window_size_too_small() {
        ReplayWindow::new(31);
    }

    #[test]
    #[should_panic(expected = "Window size must be between")]
    fn test_window_size_too_large() {
        ReplayWindow::new(65);
    }

    #[test]
    fn test_sequence_zero_rejected() {
        let mut window = ReplayWindow::default();
        assert_eq!(window.check_and_update(0), ReplayVerdict::Stale);
        assert_eq!(window.highest_seq(), 0);
    }

    #[test]
    fn test_first_packet_any_sequence() {
        let mut window = ReplayWindow::default();
        assert_eq!(window.check_and_update(1000), ReplayVerdict::Accepted);
        assert_eq!(window.highest_seq(), 1000);
    }

    #[test]
    fn test_sequential_accept() {
        let mut window = ReplayWindow::default();
        for seq in 1..=10 {
            assert!(
                window.check_and_update(seq).is_accepted(),
                "seq {} must be accepted",
                seq
            );
        }
        assert_eq!(window.highest_seq(), 10);
    }

    #[test]
    fn test_binding_contract_5_3_5_6() {
        let mut window = ReplayWindow::default();
        assert_eq!(window.check_and_update(5), ReplayVerdict::Accepted);
        assert_eq!(window.check_and_update(3), ReplayVerdict::Stale);
        assert_eq!(window.check_and_update(5), ReplayVerdict::Duplicate);
        assert_eq!(window.check_and_update(6), ReplayVerdict::Accepted);
        assert_eq!(window.highest_seq(), 6);
    }

    #[test]
    fn test_replay_of_old_accepted_is_duplicate() {
        let mut window = ReplayWindow::default();
        window.check_and_update(10);
        window.check_and_update(11);
        window.check_and_update(12);

        // 10 and 11 were accepted and still sit in the window span
        assert_eq!(window.check_and_update(10), ReplayVerdict::Duplicate);
        assert_eq!(window.check_and_update(11), ReplayVerdict::Duplicate);
    }

    #[test]
    fn test_never_seen_old_is_stale() {
        let mut window = ReplayWindow::default();
        window.check_and_update(10);

        // 7 was skipped, so its replay classifies as stale, not duplicate
        assert_eq!(window.check_and_update(7), ReplayVerdict::Stale);
    }

    #[test]
    fn test_rejection_does_not_mutate() {
        let mut window = ReplayWindow::default();
        window.check_and_update(5);

        window.check_and_update(3);
        window.check_and_update(5);
        assert_eq!(window.highest_seq(), 5);

        // Still able to advance normally afterwards
        assert_eq!(window.check_and_update(6), ReplayVerdict::Accepted);
    }

    #[test]
    fn test_large_gap_clears_bitmap() {
        let mut window = ReplayWindow::default();
        window.check_and_update(10);
        assert_eq!(window.check_and_update(200), ReplayVerdict::Accepted);
        assert_eq!(window.highest_seq(), 200);

        // 10 fell far outside the window span
        assert_eq!(window.check_and_update(10), ReplayVerdict::Stale);
    }

    #[test]
    fn test_duplicate_beyond_window_span_is_stale() {
        let mut window = ReplayWindow::new(32);
        window.check_and_update(1);
        window.check_and_update(100);

        // seq 1 was accepted once, but its bit slid out of the 32-packet
        // span, so the classification degrades to stale
        assert_eq!(window.check_and_update(1), ReplayVerdict::Stale);
    }

    #[test]
    fn test_reset() {
        let mut window = ReplayWindow::default();
        window.check_and_update(42);
        window.reset();
        assert_eq!(window.highest_seq(), 0);
        assert_eq!(window.check_and_update(1), ReplayVerdict::Accepted);
    }

    #[test]
    fn test_verdict_reasons() {
        assert_eq!(ReplayVerdict::Stale.reason(), "below window lower bound");
        assert_eq!(
            ReplayVerdict::Duplicate.reason(),
            "duplicate within window"
        );
        assert!(ReplayVerdict::Accepted.is_accepted());
        assert!(!ReplayVerdict::Stale.is_accepted());
    }
}
