//! Frame sequence number tracking and drop accounting.
//!
//! FSNs advance by one per data frame and wrap at 65536. Every value with
//! `fsn % 32 == 31` is reserved for a parity frame that never appears on the
//! wire, so the expected successor skips it. Any other difference between
//! the received and the expected FSN is counted, modulo 65536, as dropped
//! frames. A repeated FSN therefore counts as a near-complete wrap (65535).

use tracing::debug;

use crate::types::is_parity_slot;

#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    expected: Option<u16>,
    dropped_total: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received FSN and return how many frames were missed before it.
    ///
    /// The first frame after construction or [`reset`](Self::reset) seeds the
    /// tracker and reports zero.
    pub fn accept(&mut self, fsn: u16) -> u16 {
        let dropped = match self.expected {
            Some(expected) => fsn.wrapping_sub(expected),
            None => 0,
        };

        if dropped != 0 {
            debug!(fsn, expected = ?self.expected, dropped, "SDDS sequence gap");
            self.dropped_total += dropped as u64;
        }

        self.expected = Some(successor(fsn));
        dropped
    }

    /// Next FSN the tracker expects, if seeded.
    pub fn expected(&self) -> Option<u16> {
        self.expected
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// FSN following `fsn` on the wire, skipping the parity slot.
pub fn successor(fsn: u16) -> u16 {
    let next = fsn.wrapping_add(1);
    if is_parity_slot(next) { next.wrapping_add(1) } else { next }
}
