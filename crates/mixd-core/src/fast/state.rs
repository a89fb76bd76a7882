//! Snapshot published to the fast path

use crate::config::MAX_FAST_TRACKS;

/// What the fast path does with its cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastCommand {
    /// Parked on the cold-idle gate; the control loop wakes it
    ColdIdle,
    /// Running but doing no work, while the control loop edits state the
    /// fast path must not read mid-update
    HotIdle,
    /// Mix without writing (sink not ready)
    Mix,
    /// Write the last mix without mixing
    Write,
    /// Normal operation
    MixWrite,
    /// Leave the thread loop
    Exit,
}

impl FastCommand {
    #[inline]
    pub fn mixes(&self) -> bool {
        matches!(self, FastCommand::Mix | FastCommand::MixWrite)
    }

    #[inline]
    pub fn writes(&self) -> bool {
        matches!(self, FastCommand::Write | FastCommand::MixWrite)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FastCommand::ColdIdle => "cold-idle",
            FastCommand::HotIdle => "hot-idle",
            FastCommand::Mix => "mix",
            FastCommand::Write => "write",
            FastCommand::MixWrite => "mix-write",
            FastCommand::Exit => "exit",
        }
    }
}

/// Per-slot descriptor
///
/// The provider itself travels separately (see
/// [`FastAttachment`](super::FastAttachment)); the descriptor names which
/// attachment generation the slot should be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FastTrackDesc {
    pub generation: u32,
    /// Channels at the chain head (1 or 2)
    pub channels: u8,
}

/// Immutable configuration snapshot
///
/// Fixed size and `Copy`: nothing variable-sized crosses the state queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastMixerState {
    pub command: FastCommand,
    pub frame_count: usize,
    /// Bit `n` set = slot `n` is mixed
    pub active_tracks: u32,
    pub tracks: [FastTrackDesc; MAX_FAST_TRACKS],
    /// Bumped whenever the active set or a descriptor changes
    pub fast_tracks_gen: u32,
    /// Bumped on every entry into cold idle
    pub cold_gen: u32,
}

impl FastMixerState {
    pub fn new() -> Self {
        Self {
            command: FastCommand::ColdIdle,
            frame_count: 0,
            active_tracks: 0,
            tracks: [FastTrackDesc::default(); MAX_FAST_TRACKS],
            fast_tracks_gen: 0,
            cold_gen: 0,
        }
    }

    #[inline]
    pub fn is_active(&self, slot: usize) -> bool {
        slot < MAX_FAST_TRACKS && self.active_tracks & (1 << slot) != 0
    }

    /// Mark `slot` active with a new descriptor
    pub fn activate(&mut self, slot: usize, desc: FastTrackDesc) {
        self.active_tracks |= 1 << slot;
        self.tracks[slot] = desc;
        self.fast_tracks_gen = self.fast_tracks_gen.wrapping_add(1);
    }

    pub fn deactivate(&mut self, slot: usize) {
        if self.is_active(slot) {
            self.active_tracks &= !(1 << slot);
            self.fast_tracks_gen = self.fast_tracks_gen.wrapping_add(1);
        }
    }

    /// Active slot indices in increasing order
    pub fn active_slots(&self) -> impl Iterator<Item = usize> {
        let mut bits = self.active_tracks;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let slot = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(slot)
        })
    }
}

impl Default for FastMixerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_slots_iterate_in_order() {
        let mut state = FastMixerState::new();
        state.activate(5, FastTrackDesc { generation: 1, channels: 2 });
        state.activate(0, FastTrackDesc { generation: 1, channels: 2 });
        state.activate(31, FastTrackDesc { generation: 1, channels: 1 });
        assert_eq!(state.active_slots().collect::<Vec<_>>(), vec![0, 5, 31]);

        state.deactivate(5);
        assert!(!state.is_active(5));
        assert_eq!(state.active_slots().count(), 2);
    }

    #[test]
    fn test_generation_bumps_only_on_change() {
        let mut state = FastMixerState::new();
        state.deactivate(3);
        assert_eq!(state.fast_tracks_gen, 0);
        state.activate(3, FastTrackDesc::default());
        state.deactivate(3);
        assert_eq!(state.fast_tracks_gen, 2);
    }

    #[test]
    fn test_command_bits() {
        assert!(FastCommand::MixWrite.mixes() && FastCommand::MixWrite.writes());
        assert!(!FastCommand::Write.mixes());
        assert!(!FastCommand::HotIdle.writes());
    }
}
