//! Engine front end
//!
//! [`MixingEngine`] owns the control loop thread (and, through it, the fast
//! path). Clients only ever hold a `MixingEngine` and their
//! [`TrackHandle`]s; everything else happens on the engine's threads.
//!
//! ```text
//! client ──create_track()──► control loop ──state queue──► fast path ──► sink
//!   │                           ▲    │                        ▲
//!   └── TrackHandle ──ring──────┘    └──────pipe──────────────┘
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Sender};

use crate::config::{EngineConfig, PowerState};
use crate::control::{
    spawn_control_loop, ControlCommand, ControlLoop, ControlStats, ControlStatsSnapshot,
    DirectOutput, EffectChain, FastPathOutput, OutputStrategy,
};
use crate::error::{MixerError, MixerResult};
use crate::fast::{FastMixerStats, FastStatsSnapshot};
use crate::sink::{OutputSink, SinkFormat};
use crate::track::{validate_track_format, TrackHandle, TrackOptions};
use crate::types::TrackFormat;

/// Counters from both halves of the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    pub control: ControlStatsSnapshot,
    /// `None` when running without a fast path
    pub fast: Option<FastStatsSnapshot>,
}

/// A running mixing engine
pub struct MixingEngine {
    config: EngineConfig,
    sink_format: SinkFormat,
    commands: Sender<ControlCommand>,
    thread: Option<JoinHandle<()>>,
    control_stats: Arc<ControlStats>,
    fast_stats: Option<Arc<FastMixerStats>>,
}

impl MixingEngine {
    /// Negotiate a format with `sink` and start the engine threads
    ///
    /// The engine starts in standby; the sink sees its first write when the
    /// first track starts.
    pub fn start(config: EngineConfig, mut sink: Box<dyn OutputSink>) -> MixerResult<Self> {
        let config = config.sanitized();
        let candidates: Vec<SinkFormat> = config
            .sink_formats
            .iter()
            .map(|&format| SinkFormat::new(format, config.sample_rate))
            .collect();
        let sink_format = sink.negotiate(&candidates)?;
        log::info!(
            "Sink '{}' negotiated {} at {}Hz",
            sink.name(),
            sink_format.sample_format.name(),
            sink_format.sample_rate
        );

        let (output, fast_stats): (Box<dyn OutputStrategy>, _) = if config.fast_path {
            let fast = FastPathOutput::start(&config, sink, sink_format)?;
            let stats = Arc::clone(fast.stats());
            (Box::new(fast), Some(stats))
        } else {
            let direct = DirectOutput::new(sink, sink_format, config.frame_count);
            (Box::new(direct), None)
        };

        let (commands, receiver) = unbounded();
        let control = ControlLoop::new(config.clone(), output, commands.clone());
        let control_stats = control.stats();
        let thread = spawn_control_loop(control, receiver).map_err(|e| MixerError::ThreadSpawn {
            name: "control loop",
            reason: e.to_string(),
        })?;

        log::info!(
            "Mixing engine started: {}Hz, {} frames/cycle, fast path {}",
            config.sample_rate,
            config.frame_count,
            if config.fast_path { "on" } else { "off" }
        );
        Ok(Self {
            config,
            sink_format,
            commands,
            thread: Some(thread),
            control_stats,
            fast_stats,
        })
    }

    /// Effective (sanitized) configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink_format(&self) -> SinkFormat {
        self.sink_format
    }

    /// Create a track in the `Idle` state
    ///
    /// Format errors are reported here, before the track exists. A fast
    /// request that cannot be honored yields a normal track; check
    /// [`TrackHandle::is_fast`].
    pub fn create_track(&self, format: TrackFormat, options: TrackOptions) -> MixerResult<TrackHandle> {
        validate_track_format(&format, &self.config)?;
        let (reply, response) = bounded(1);
        self.send(ControlCommand::CreateTrack {
            format,
            options,
            reply,
        })?;
        response.recv().map_err(|_| MixerError::EngineShutDown)?
    }

    pub fn set_power_state(&self, state: PowerState) -> MixerResult<()> {
        self.send(ControlCommand::SetPowerState(state))
    }

    /// Process tracks of `session` through `chain` before the main mix
    pub fn attach_effect_chain(&self, session: u32, chain: Box<dyn EffectChain>) -> MixerResult<()> {
        let (reply, response) = bounded(1);
        self.send(ControlCommand::AttachEffectChain {
            session,
            chain,
            reply,
        })?;
        response.recv().map_err(|_| MixerError::EngineShutDown)?
    }

    pub fn detach_effect_chain(&self, session: u32) -> MixerResult<()> {
        self.send(ControlCommand::DetachEffectChain(session))
    }

    /// Set (or clear) the chain processing the aux send bus
    pub fn set_aux_effect_chain(&self, chain: Option<Box<dyn EffectChain>>) -> MixerResult<()> {
        self.send(ControlCommand::SetAuxEffectChain(chain))
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            control: self.control_stats.snapshot(),
            fast: self.fast_stats.as_ref().map(|stats| stats.snapshot()),
        }
    }

    /// Per-slot underrun counters of the fast path
    pub fn fast_stats(&self) -> Option<&Arc<FastMixerStats>> {
        self.fast_stats.as_ref()
    }

    /// Stop both threads and hand the sink back
    ///
    /// Idempotent; later calls return `None`. Track handles outlive the
    /// engine but their commands fail with `EngineShutDown`.
    pub fn shutdown(&mut self) -> Option<Box<dyn OutputSink>> {
        let thread = self.thread.take()?;
        let (reply, response) = bounded(1);
        let sink = match self.commands.send(ControlCommand::Shutdown { reply }) {
            Ok(()) => response.recv().ok().flatten(),
            Err(_) => None,
        };
        if thread.join().is_err() {
            log::error!("Control loop thread panicked");
        }
        log::info!("Mixing engine stopped");
        sink
    }

    fn send(&self, command: ControlCommand) -> MixerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| MixerError::EngineShutDown)
    }
}

impl Drop for MixingEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
