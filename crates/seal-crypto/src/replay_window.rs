//! Replay window for inbound frames.
//!
//! This implements a sliding window to detect and reject replayed frames.
//! The window covers the sequence numbers `[base, base + size)` and keeps
//! one bit per sequence number in a ring-indexed bitmap.
//!
//! # Design
//!
//! - Window size: 2048 sequence numbers by default, at least 1024
//! - Sequence numbers below `base` are rejected as stale
//! - Sequence numbers already marked inside the window are rejected as duplicates
//! - A sequence number at or past `base + size` slides the window forward so
//!   that it becomes the newest entry; bits that fall out are forgotten
//!
//! Memory stays at `size` bits no matter how long the stream runs.
//!
//! # Thread Safety
//!
//! This implementation is NOT thread-safe. It is owned by the ingress loop.

/// Outcome of looking a sequence number up in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not seen before; accepting it is allowed.
    Fresh,
    /// Below the window base.
    Stale,
    /// Already accepted.
    Duplicate,
}

/// Sliding window for replay protection.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    /// Lowest sequence number still tracked
    base: u64,
    /// Bit `seq % size` is set once `seq` has been accepted
    bitmap: Box<[u64]>,
    /// Window size (number of sequence numbers tracked)
    size: u64,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayWindow {
    /// Default window size: 2048 sequence numbers
    pub const DEFAULT_SIZE: u64 = 2048;

    /// Smallest window we allow.
    pub const MIN_SIZE: u64 = 1024;

    /// Create a new window with the default size starting at sequence 0.
    pub fn new() -> Self {
        Self::with_size(Self::DEFAULT_SIZE)
    }

    /// Create a new window with a custom size starting at sequence 0.
    ///
    /// # Panics
    /// Panics if size is below 1024 or not a multiple of 64.
    pub fn with_size(size: u64) -> Self {
        Self::with_base(size, 0)
    }

    /// Create a window of `size` whose first tracked sequence number is `base`.
    ///
    /// # Panics
    /// Panics if size is below 1024 or not a multiple of 64.
    pub fn with_base(size: u64, base: u64) -> Self {
        assert!(
            Self::is_valid_size(size),
            "window size must be >= 1024 and a multiple of 64"
        );
        Self {
            base,
            bitmap: vec![0u64; (size / 64) as usize].into_boxed_slice(),
            size,
        }
    }

    pub fn is_valid_size(size: u64) -> bool {
        size >= Self::MIN_SIZE && size % 64 == 0
    }

    /// Look a sequence number up without changing the window.
    pub fn check(&self, seq: u64) -> Verdict {
        if seq < self.base {
            return Verdict::Stale;
        }
        if seq - self.base >= self.size {
            // Ahead of the window, accepting it would slide
            return Verdict::Fresh;
        }
        if self.is_marked(seq) {
            Verdict::Duplicate
        } else {
            Verdict::Fresh
        }
    }

    /// Check and update: returns true if fresh, false if stale or duplicate.
    ///
    /// If fresh, marks the sequence number as seen.
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq < self.base {
            return false;
        }

        if seq - self.base >= self.size {
            self.slide_to(seq - self.size + 1);
        } else if self.is_marked(seq) {
            return false;
        }

        self.mark(seq);
        true
    }

    /// Lowest sequence number still inside the window.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn slide_to(&mut self, new_base: u64) {
        let shift = new_base - self.base;
        if shift >= self.size {
            self.bitmap.fill(0);
        } else {
            for seq in self.base..new_base {
                self.clear(seq);
            }
        }
        self.base = new_base;
    }

    fn slot(&self, seq: u64) -> (usize, u64) {
        let index = seq % self.size;
        ((index / 64) as usize, 1u64 << (index % 64))
    }

    fn is_marked(&self, seq: u64) -> bool {
        let (word, mask) = self.slot(seq);
        self.bitmap[word] & mask != 0
    }

    fn mark(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bitmap[word] |= mask;
    }

    fn clear(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bitmap[word] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u64 = ReplayWindow::MIN_SIZE;

    #[test]
    fn test_sequential_packets() {
        let mut window = ReplayWindow::new();

        for i in 0..5000 {
            assert!(window.accept(i), "packet {} should be valid", i);
        }
    }

    #[test]
    fn test_replay_detection() {
        let mut window = ReplayWindow::new();

        assert!(window.accept(1));
        assert!(window.accept(2));
        assert!(window.accept(3));

        assert!(!window.accept(1));
        assert!(!window.accept(2));
        assert!(!window.accept(3));
    }

    #[test]
    fn test_out_of_order() {
        let mut window = ReplayWindow::with_size(W);

        assert!(window.accept(5));
        assert!(window.accept(3));
        assert!(window.accept(4));
        assert!(window.accept(0));
        assert!(window.accept(W - 1));
        assert!(window.accept(1));

        for seq in [0, 1, 3, 4, 5, W - 1] {
            assert_eq!(window.check(seq), Verdict::Duplicate);
        }
        assert_eq!(window.base(), 0);
    }

    #[test]
    fn test_slide_sets_new_base() {
        let mut window = ReplayWindow::with_size(W);

        assert!(window.accept(W + 5));
        assert_eq!(window.base(), 6);

        // Old base is gone for good
        assert_eq!(window.check(0), Verdict::Stale);
        assert!(!window.accept(0));
        assert!(!window.accept(5));

        // Unseen numbers still inside the window are fine
        assert!(window.accept(W + 4));
        assert!(window.accept(6));
        assert!(!window.accept(W + 4));
    }

    #[test]
    fn test_stale_far_below_base() {
        let mut window = ReplayWindow::with_size(W);

        assert!(window.accept(10 * W));
        let base = window.base();
        assert_eq!(base, 9 * W + 1);

        // Never seen, but below the base
        assert_eq!(window.check(base - 1), Verdict::Stale);
        assert_eq!(window.check(base - W - 1), Verdict::Stale);
        assert!(!window.accept(3));
    }

    #[test]
    fn test_slide_clears_reused_slots() {
        let mut window = ReplayWindow::with_size(W);

        for seq in 0..W {
            assert!(window.accept(seq));
        }
        // Slides by 10: slots of 0..10 are reused by W..W+10
        assert!(window.accept(W + 9));
        assert_eq!(window.base(), 10);
        for seq in W..W + 9 {
            assert_eq!(window.check(seq), Verdict::Fresh, "seq {} reused slot", seq);
        }
        assert_eq!(window.check(10), Verdict::Duplicate);
    }

    #[test]
    fn test_large_jump_resets() {
        let mut window = ReplayWindow::with_size(W);

        assert!(window.accept(1));
        assert!(window.accept(1_000_000));
        assert!(!window.accept(1));
        assert_eq!(window.check(1_000_000 - 1), Verdict::Fresh);
    }

    #[test]
    fn test_check_without_update() {
        let mut window = ReplayWindow::new();

        assert!(window.accept(1));
        assert_eq!(window.check(2), Verdict::Fresh);
        assert_eq!(window.check(2), Verdict::Fresh);

        assert!(window.accept(2));
        assert_eq!(window.check(2), Verdict::Duplicate);
    }

    #[test]
    fn test_custom_base() {
        let mut window = ReplayWindow::with_base(W, 500);
        assert_eq!(window.check(499), Verdict::Stale);
        assert!(window.accept(500));
    }

    #[test]
    fn test_near_u64_max() {
        let mut window = ReplayWindow::with_size(W);
        assert!(window.accept(u64::MAX));
        assert_eq!(window.base(), u64::MAX - W + 1);
        assert!(!window.accept(u64::MAX));
        assert!(window.accept(u64::MAX - 1));
    }

    #[test]
    #[should_panic(expected = "window size")]
    fn test_window_too_small() {
        let _ = ReplayWindow::with_size(128);
    }
}
