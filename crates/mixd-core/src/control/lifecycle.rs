//! Track lifecycle states
//!
//! ```text
//! Idle ──start──> Active ──pause──> Pausing ──> Paused ──start──> Resuming ──> Active
//!                   │
//!                 stop
//!                   v
//!               Stopping1 ──drained──> Stopping2 ──presented──> Stopped ──> Idle
//!
//! flush (not while Active/Resuming) ──> Flushed ──> Idle
//! destroy (any state) ──> Terminated
//! ```
//!
//! The transitions driven by client commands live here; the ones driven by
//! buffer levels and presentation progress are applied by the control loop
//! each cycle.

/// Lifecycle state of a track, owned by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Created, never started (or reset after stop/flush)
    Idle,
    /// Restarted after a pause, mixing again once buffered
    Resuming,
    Active,
    /// Ramping down before leaving the mix
    Pausing,
    /// Out of the mix, buffered data kept
    Paused,
    /// Stopped by the client, still draining buffered audio
    Stopping1,
    /// Drained; waiting for the output to present the tail
    Stopping2,
    /// Tail presented (or nothing left to play); reset next cycle
    Stopped,
    /// Buffered data discarded; reset next cycle
    Flushed,
    /// Destroyed; reclaimed once every provider is back
    Terminated,
}

impl TrackState {
    pub fn name(&self) -> &'static str {
        match self {
            TrackState::Idle => "idle",
            TrackState::Resuming => "resuming",
            TrackState::Active => "active",
            TrackState::Pausing => "pausing",
            TrackState::Paused => "paused",
            TrackState::Stopping1 => "stopping-1",
            TrackState::Stopping2 => "stopping-2",
            TrackState::Stopped => "stopped",
            TrackState::Flushed => "flushed",
            TrackState::Terminated => "terminated",
        }
    }

    /// States whose audio is pulled into the mix
    pub fn is_mixing(&self) -> bool {
        matches!(
            self,
            TrackState::Resuming | TrackState::Active | TrackState::Pausing | TrackState::Stopping1
        )
    }

    /// States that keep the output out of standby
    pub fn is_busy(&self) -> bool {
        self.is_mixing() || *self == TrackState::Stopping2
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, TrackState::Stopping1 | TrackState::Stopping2)
    }

    /// Target state for a start request, `None` if already playing
    pub fn on_start(self) -> Option<TrackState> {
        match self {
            TrackState::Paused | TrackState::Pausing => Some(TrackState::Resuming),
            TrackState::Idle
            | TrackState::Stopping1
            | TrackState::Stopping2
            | TrackState::Stopped
            | TrackState::Flushed => Some(TrackState::Active),
            TrackState::Active | TrackState::Resuming | TrackState::Terminated => None,
        }
    }

    pub fn on_pause(self) -> Option<TrackState> {
        match self {
            TrackState::Active | TrackState::Resuming => Some(TrackState::Pausing),
            _ => None,
        }
    }

    /// A playing track drains first; anything else stops at once
    pub fn on_stop(self) -> Option<TrackState> {
        match self {
            TrackState::Active | TrackState::Resuming | TrackState::Pausing => {
                Some(TrackState::Stopping1)
            }
            TrackState::Idle | TrackState::Paused | TrackState::Flushed => Some(TrackState::Stopped),
            TrackState::Stopping1
            | TrackState::Stopping2
            | TrackState::Stopped
            | TrackState::Terminated => None,
        }
    }

    /// Flushing a playing track is ignored
    pub fn on_flush(self) -> Option<TrackState> {
        match self {
            TrackState::Active | TrackState::Resuming | TrackState::Terminated => None,
            _ => Some(TrackState::Flushed),
        }
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pre-roll progress since the last start
///
/// Starvation while `Filling` is expected and costs no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Waiting for the first full cycle of data
    Filling,
    /// Enough buffered; mixed from the next cycle
    Filled,
    /// Mixed at least once; starvation now counts
    Active,
}

/// Consecutive-starvation budget of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Record a starved cycle; true once more than `max` in a row
    pub fn starve(&mut self) -> bool {
        self.used = self.used.saturating_add(1);
        self.used > self.max
    }

    pub fn refill(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}
