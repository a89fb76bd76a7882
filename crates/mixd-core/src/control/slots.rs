//! Fast track slot leases

use crate::config::MAX_FAST_TRACKS;

/// Slot the normal-mix pipe occupies on the fast path
pub const PIPE_SLOT: usize = 0;

/// Bitmask pool of fast track slots
///
/// Slot 0 is reserved for the pipe and never leased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastSlotPool {
    /// Bit `n` set = slot `n` free
    free: u32,
    /// Per-slot generation of the last lease
    generations: [u32; MAX_FAST_TRACKS],
}

impl FastSlotPool {
    /// Pool with `slots` slots in total, pipe included
    pub fn new(slots: usize) -> Self {
        let slots = slots.clamp(1, MAX_FAST_TRACKS);
        let all = if slots == 32 { u32::MAX } else { (1u32 << slots) - 1 };
        Self {
            free: all & !(1 << PIPE_SLOT),
            generations: [0; MAX_FAST_TRACKS],
        }
    }

    /// Lowest free slot
    pub fn lease(&mut self) -> Option<usize> {
        if self.free == 0 {
            return None;
        }
        let slot = self.free.trailing_zeros() as usize;
        self.free &= !(1 << slot);
        Some(slot)
    }

    pub fn release(&mut self, slot: usize) {
        if slot != PIPE_SLOT && slot < MAX_FAST_TRACKS {
            self.free |= 1 << slot;
        }
    }

    pub fn available(&self) -> usize {
        self.free.count_ones() as usize
    }

    /// Fresh attachment generation for `slot` (never 0)
    pub fn next_generation(&mut self, slot: usize) -> u32 {
        let generation = &mut self.generations[slot];
        *generation = generation.wrapping_add(1).max(1);
        *generation
    }
}
