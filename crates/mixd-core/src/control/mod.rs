//! Control loop: track admission and lifecycle
//!
//! The normal-priority half of the engine. One thread owns every track (in
//! an id-keyed arena), runs the normal mixer once per period, decides each
//! cycle which tracks are mixed, and publishes fast-path topology changes
//! through the state queue. It may block, allocate and log; the fast path
//! may do none of those.
//!
//! Clients talk to it over a crossbeam channel of [`ControlCommand`]s.
//! Track creation is request/reply so format errors reach the caller
//! synchronously; everything else is fire-and-forget.

mod control_loop;
mod effects;
mod lifecycle;
mod output;
mod slots;

pub use control_loop::ControlLoop;
pub use effects::{EffectChain, MAX_EFFECT_SESSIONS};
pub use lifecycle::{FillStatus, RetryBudget, TrackState};
pub use output::{DirectOutput, FastPathOutput, OutputStrategy};
pub use slots::{FastSlotPool, PIPE_SLOT};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use crate::config::PowerState;
use crate::error::MixerResult;
use crate::priority::{set_elevated_priority, PriorityResult, CONTROL_LOOP_NICE};
use crate::sink::OutputSink;
use crate::track::{TrackHandle, TrackId, TrackOptions};
use crate::types::TrackFormat;

/// Requests to the control loop
pub enum ControlCommand {
    CreateTrack {
        format: TrackFormat,
        options: TrackOptions,
        reply: Sender<MixerResult<TrackHandle>>,
    },
    Start(TrackId),
    Stop(TrackId),
    Pause(TrackId),
    Flush(TrackId),
    Destroy(TrackId),
    SetPowerState(PowerState),
    AttachEffectChain {
        session: u32,
        chain: Box<dyn EffectChain>,
        reply: Sender<MixerResult<()>>,
    },
    DetachEffectChain(u32),
    SetAuxEffectChain(Option<Box<dyn EffectChain>>),
    /// Idle the fast path, tear everything down and hand the sink back
    Shutdown {
        reply: Sender<Option<Box<dyn OutputSink>>>,
    },
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::CreateTrack { .. } => "create-track",
            ControlCommand::Start(_) => "start",
            ControlCommand::Stop(_) => "stop",
            ControlCommand::Pause(_) => "pause",
            ControlCommand::Flush(_) => "flush",
            ControlCommand::Destroy(_) => "destroy",
            ControlCommand::SetPowerState(_) => "set-power-state",
            ControlCommand::AttachEffectChain { .. } => "attach-effect-chain",
            ControlCommand::DetachEffectChain(_) => "detach-effect-chain",
            ControlCommand::SetAuxEffectChain(_) => "set-aux-effect-chain",
            ControlCommand::Shutdown { .. } => "shutdown",
        }
    }
}

impl std::fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters published by the control loop
#[derive(Debug, Default)]
pub struct ControlStats {
    cycles: AtomicU64,
    short_writes: AtomicU64,
    tracks: AtomicU32,
    mixing: AtomicU32,
    /// Tracks removed after exhausting their retry budget
    disabled: AtomicU64,
    standby: AtomicBool,
}

/// Plain copy of [`ControlStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStatsSnapshot {
    pub cycles: u64,
    pub short_writes: u64,
    pub tracks: u32,
    pub mixing: u32,
    pub disabled: u64,
    pub standby: bool,
}

impl ControlStats {
    pub fn snapshot(&self) -> ControlStatsSnapshot {
        ControlStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            tracks: self.tracks.load(Ordering::Relaxed),
            mixing: self.mixing.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
            standby: self.standby.load(Ordering::Relaxed),
        }
    }

    fn record_cycle(&self, short: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if short {
            self.short_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set_tracks(&self, tracks: usize, mixing: usize) {
        self.tracks.store(tracks as u32, Ordering::Relaxed);
        self.mixing.store(mixing as u32, Ordering::Relaxed);
    }

    fn record_disabled(&self) {
        self.disabled.fetch_add(1, Ordering::Relaxed);
    }

    fn set_standby(&self, standby: bool) {
        self.standby.store(standby, Ordering::Relaxed);
    }
}

/// Run `control` on its own thread until a shutdown command
pub fn spawn_control_loop(
    control: ControlLoop,
    commands: Receiver<ControlCommand>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mixd-control".to_string())
        .spawn(move || {
            match set_elevated_priority(CONTROL_LOOP_NICE) {
                PriorityResult::Success => {
                    log::debug!("Control loop running at nice {}", CONTROL_LOOP_NICE)
                }
                PriorityResult::Failed => {
                    log::warn!("Could not raise control loop priority; running at default")
                }
                PriorityResult::Unsupported => {}
            }
            control.run(commands);
        })
}
