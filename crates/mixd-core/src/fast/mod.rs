//! Fast path: the hard real-time mixer in front of the sink
//!
//! A dedicated thread mixes a small fixed set of low-latency tracks plus
//! the control loop's mix (arriving through a pipe in slot 0) and writes
//! the result to the sink once per fast period. It never allocates, locks
//! or logs. Everything it needs reaches it one of three ways:
//!
//! - configuration snapshots ([`FastMixerState`]) through the
//!   double-buffered state queue
//! - providers ([`FastAttachment`]) through an SPSC ring, sent before the
//!   state that names them and returned on a second ring when retired
//! - per-track volume and counters through [`crate::track::TrackShared`]
//!
//! While cold idle the thread parks on the [`ColdIdleGate`].

mod gate;
mod mixer;
mod state;
mod stats;

pub use gate::ColdIdleGate;
pub use mixer::{CycleOutcome, FastMixer};
pub use state::{FastCommand, FastMixerState, FastTrackDesc};
pub use stats::{FastMixerStats, FastStatsSnapshot, FillClass, UnderrunCounters, UnderrunSnapshot, Warmup};

use std::io;
use std::thread::{self, JoinHandle};

use crate::priority::{set_realtime_priority, PriorityResult, FAST_MIXER_PRIORITY};
use crate::provider::BufferProvider;
use crate::sink::OutputSink;
use crate::track::SharedTrack;

/// A provider handed to the fast path for one slot
///
/// `generation` must match the slot's [`FastTrackDesc`] in the state that
/// activates it. `track` is `None` for the normal-mix pipe.
pub struct FastAttachment {
    pub slot: usize,
    pub generation: u32,
    pub provider: Box<dyn BufferProvider>,
    pub track: Option<SharedTrack>,
}

impl std::fmt::Debug for FastAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastAttachment")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("track", &self.track.is_some())
            .finish()
    }
}

/// Run `mixer` on its own real-time thread until it is told to exit
///
/// The thread hands the sink back when it ends.
pub fn spawn_fast_mixer(mut mixer: FastMixer) -> io::Result<JoinHandle<Box<dyn OutputSink>>> {
    thread::Builder::new()
        .name("mixd-fast".to_string())
        .spawn(move || {
            let realtime = set_realtime_priority(FAST_MIXER_PRIORITY) == PriorityResult::Success;
            mixer.stats().set_realtime(realtime);

            let gate = std::sync::Arc::clone(mixer.gate());
            let period = mixer.period();
            loop {
                match mixer.run_cycle(std::time::Instant::now()) {
                    CycleOutcome::Continue => {}
                    CycleOutcome::HotIdle => thread::sleep(period),
                    CycleOutcome::ColdIdle => gate.wait(),
                    CycleOutcome::Exit => break,
                }
            }
            mixer.into_sink()
        })
}
