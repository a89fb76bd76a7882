use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use super::effects::EffectSessions;
use super::lifecycle::{FillStatus, RetryBudget, TrackState};
use super::output::OutputStrategy;
use super::{ControlCommand, ControlStats};
use crate::config::EngineConfig;
use crate::error::MixerResult;
use crate::gain::StereoGain;
use crate::mixer::{AudioMixer, MixerSettings};
use crate::provider::{build_chain, track_ring, BufferProvider, ChainSpec};
use crate::sink::OutputSink;
use crate::track::{
    validate_track_format, SharedTrack, TrackHandle, TrackId, TrackOptions, TrackShared,
    TRACK_DISABLED,
};
use crate::types::TrackFormat;

/// Extra frames chain stages may stage beyond one cycle's worth
const CHAIN_HEADROOM_FRAMES: usize = 16;

/// Default ring depth in cycles
const DEFAULT_RING_PERIODS: usize = 4;

/// Where a track's provider is mixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Normal mixer, `slot` set while admitted
    Normal { slot: Option<usize> },
    /// Leased fast slot, `generation` set while attached
    Fast { slot: usize, generation: Option<u32> },
}

/// The control loop's record of one track
struct ControlTrack {
    id: TrackId,
    format: TrackFormat,
    shared: SharedTrack,
    state: TrackState,
    fill: FillStatus,
    retries: RetryBudget,
    last_underruns: u32,
    last_released: u64,
    /// Chain head while not lent to a mixer
    provider: Option<Box<dyn BufferProvider>>,
    /// Channels at the chain head
    channels: usize,
    placement: Placement,
    session: Option<u32>,
    /// Rate the mixer slot runs the track at (0 = not admitted)
    rate: u32,
    /// Position the output must present before a stop completes (mix
    /// frames for normal tracks, track frames for fast tracks)
    stop_target: u64,
}

impl ControlTrack {
    fn set_state(&mut self, state: TrackState) {
        log::debug!("{}: {} -> {}", self.id, self.state, state);
        self.state = state;
    }

    /// Provider back with the control loop (not lent out, not in flight)
    fn is_home(&self) -> bool {
        self.provider.is_some()
    }

    fn requested_rate(&self) -> u32 {
        match self.shared.sample_rate() {
            0 => self.format.sample_rate,
            rate => rate,
        }
    }

    fn restart(&mut self, state: TrackState) {
        self.fill = FillStatus::Filling;
        self.retries.refill();
        self.shared.clear_flags(TRACK_DISABLED);
        self.set_state(state);
    }
}

/// Frames a track at `rate` must supply for one normal cycle
fn frames_needed(config: &EngineConfig, rate: u32) -> usize {
    let engine = config.sample_rate as u64;
    let cap = (config.sample_rate as f64 * config.max_resample_ratio) as u64;
    let rate = (rate as u64).min(cap).max(1);
    (config.frame_count as u64 * rate).div_ceil(engine) as usize
}

// ─────────────────────────────────────────────────────────────────────────────
// Control loop
// ─────────────────────────────────────────────────────────────────────────────

/// Normal-path driver: track admission, lifecycle and the normal mix
pub struct ControlLoop {
    config: EngineConfig,
    mixer: AudioMixer,
    output: Box<dyn OutputStrategy>,
    tracks: BTreeMap<TrackId, ControlTrack>,
    next_id: u32,
    effects: EffectSessions,
    /// Handed to every new track handle
    commands: Sender<ControlCommand>,
    stats: Arc<ControlStats>,
    /// Frames handed to the output since start
    mixed_frames: u64,
    standby: bool,
    last_busy: Instant,
}

impl ControlLoop {
    pub fn new(
        config: EngineConfig,
        output: Box<dyn OutputStrategy>,
        commands: Sender<ControlCommand>,
    ) -> Self {
        let mixer = AudioMixer::new(MixerSettings::normal(&config, EffectSessions::output_count()));
        let stats = Arc::new(ControlStats::default());
        stats.set_standby(true);
        Self {
            effects: EffectSessions::new(config.frame_count),
            config,
            mixer,
            output,
            tracks: BTreeMap::new(),
            next_id: 1,
            commands,
            stats,
            mixed_frames: 0,
            standby: true,
            last_busy: Instant::now(),
        }
    }

    pub fn stats(&self) -> Arc<ControlStats> {
        Arc::clone(&self.stats)
    }

    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }

    pub fn track_state(&self, id: TrackId) -> Option<TrackState> {
        self.tracks.get(&id).map(|track| track.state)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_standby(&self) -> bool {
        self.standby
    }

    pub fn mixed_frames(&self) -> u64 {
        self.mixed_frames
    }

    /// Whether a cycle should run now (standby cycles never wait on output)
    pub fn cycle_due(&self) -> bool {
        self.standby || self.output.ready()
    }

    /// Serve commands and run cycles until shut down
    pub fn run(mut self, commands: Receiver<ControlCommand>) {
        log::info!(
            "Control loop started: output '{}', {} frames/cycle at {}Hz",
            self.output.name(),
            self.config.frame_count,
            self.config.sample_rate
        );
        let period = self.config.period();
        loop {
            let wait = if self.standby {
                period
            } else if self.output.ready() {
                Duration::ZERO
            } else {
                period / 4
            };
            match commands.recv_timeout(wait) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    break;
                }
            }
            if self.cycle_due() {
                self.run_cycle(Instant::now());
            }
        }
        log::info!("Control loop stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    /// Apply one command; false once the loop should exit
    pub fn handle_command(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::CreateTrack {
                format,
                options,
                reply,
            } => {
                let result = self.create_track(format, options);
                if let Err(e) = &result {
                    log::warn!("Track creation rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            ControlCommand::Start(id) => {
                let Some(track) = self.tracks.get_mut(&id) else {
                    log::debug!("start: unknown {}", id);
                    return true;
                };
                if let Some(next) = track.state.on_start() {
                    track.restart(next);
                    self.exit_standby();
                }
            }
            ControlCommand::Stop(id) => self.apply(id, TrackState::on_stop),
            ControlCommand::Pause(id) => self.apply(id, TrackState::on_pause),
            ControlCommand::Flush(id) => {
                if let Some(track) = self.tracks.get(&id) {
                    if track.state.on_flush().is_some() {
                        track.shared.request_flush();
                    }
                }
                self.apply(id, TrackState::on_flush);
            }
            ControlCommand::Destroy(id) => {
                if let Some(track) = self.tracks.get_mut(&id) {
                    track.set_state(TrackState::Terminated);
                }
            }
            ControlCommand::SetPowerState(power_state) => {
                log::info!("Power state: {:?}", power_state);
                self.config.power_state = power_state;
                let setpoint = self.config.pipe_setpoint_frames();
                if let Some(fast) = self.output.fast_path() {
                    fast.set_setpoint(setpoint);
                }
            }
            ControlCommand::AttachEffectChain {
                session,
                chain,
                reply,
            } => {
                let result = self.effects.attach(session, chain).map(|_| ());
                let _ = reply.send(result);
            }
            ControlCommand::DetachEffectChain(session) => {
                self.effects.detach(session);
            }
            ControlCommand::SetAuxEffectChain(chain) => {
                log::info!("Aux effect chain {}", if chain.is_some() { "set" } else { "cleared" });
                self.effects.set_aux(chain);
            }
            ControlCommand::Shutdown { reply } => {
                let sink = self.shutdown();
                let _ = reply.send(sink);
                return false;
            }
        }
        true
    }

    fn apply(&mut self, id: TrackId, transition: fn(TrackState) -> Option<TrackState>) {
        match self.tracks.get_mut(&id) {
            Some(track) => {
                if let Some(next) = transition(track.state) {
                    track.set_state(next);
                }
            }
            None => log::debug!("Command for unknown {}", id),
        }
    }

    /// Validate `format`, build the track's ring and chain, and register it
    pub fn create_track(&mut self, format: TrackFormat, options: TrackOptions) -> MixerResult<TrackHandle> {
        validate_track_format(&format, &self.config)?;

        let fast_slot = if options.fast {
            self.lease_fast_slot(&format)
        } else {
            None
        };
        let per_cycle = frames_needed(&self.config, format.sample_rate);
        let capacity = match options.buffer_frames {
            0 => per_cycle * DEFAULT_RING_PERIODS,
            frames => frames,
        };
        let shared = TrackShared::new_shared();
        let (writer, source) = track_ring(format, capacity, shared.clone());
        let spec = ChainSpec::new(format, per_cycle.max(self.config.frame_count) + CHAIN_HEADROOM_FRAMES);
        let provider = match build_chain(source, spec) {
            Ok(provider) => provider,
            Err(e) => {
                if let (Some(slot), Some(fast)) = (fast_slot, self.output.fast_path()) {
                    fast.release_slot(slot);
                }
                return Err(e);
            }
        };

        let id = TrackId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let placement = match fast_slot {
            Some(slot) => Placement::Fast {
                slot,
                generation: None,
            },
            None => Placement::Normal { slot: None },
        };
        self.tracks.insert(
            id,
            ControlTrack {
                id,
                format,
                shared: shared.clone(),
                state: TrackState::Idle,
                fill: FillStatus::Filling,
                retries: RetryBudget::new(self.config.max_track_retries),
                last_underruns: 0,
                last_released: 0,
                provider: Some(provider),
                channels: spec.output_channels(),
                placement,
                session: options.session,
                rate: 0,
                stop_target: 0,
            },
        );
        log::info!(
            "{} created: {} {}Hz {}ch, ring {} frames{}",
            id,
            format.sample_format.name(),
            format.sample_rate,
            format.channel_count(),
            capacity,
            if fast_slot.is_some() { ", fast" } else { "" }
        );
        Ok(TrackHandle::new(
            id,
            format,
            fast_slot.is_some(),
            writer,
            shared,
            self.commands.clone(),
        ))
    }

    fn lease_fast_slot(&mut self, format: &TrackFormat) -> Option<usize> {
        if format.sample_rate != self.config.sample_rate {
            log::info!("Fast track denied: {}Hz is not the engine rate", format.sample_rate);
            return None;
        }
        let Some(fast) = self.output.fast_path() else {
            log::info!("Fast track denied: no fast path");
            return None;
        };
        let slot = fast.lease_slot();
        if slot.is_none() {
            log::info!("Fast track denied: no free fast slot");
        }
        slot
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cycle
    // ─────────────────────────────────────────────────────────────────────

    /// One control cycle at time `now`: lifecycle, admission, standby and
    /// (unless in standby) one mix period
    pub fn run_cycle(&mut self, now: Instant) {
        self.reclaim_returns();

        let presented_frames = self.output.presented_frames();
        let mut cycle = Cycle {
            config: &self.config,
            mixer: &mut self.mixer,
            output: &mut self.output,
            effects: &self.effects,
            stats: &self.stats,
            mixed_frames: self.mixed_frames,
            presented_frames,
        };
        for track in self.tracks.values_mut() {
            cycle.step(track);
        }
        self.reclaim_terminated();

        let busy = self.tracks.values().filter(|t| t.state.is_busy()).count();
        self.stats.set_tracks(self.tracks.len(), busy);
        if busy > 0 {
            self.last_busy = now;
            self.exit_standby();
        } else if !self.standby
            && now.saturating_duration_since(self.last_busy)
                >= Duration::from_millis(self.config.standby_delay_ms)
        {
            self.enter_standby();
        }

        if !self.standby {
            self.mix();
        }
    }

    fn mix(&mut self) {
        self.mixer.process();
        self.effects.process(&mut self.mixer);
        let frames = self.mixer.frame_count();
        let written = self.output.write(&self.mixer.output(0).as_slice()[..frames]);
        self.mixed_frames += written as u64;
        self.stats.record_cycle(written < frames);
    }

    fn enter_standby(&mut self) {
        log::info!(
            "Output '{}' entering standby after {}ms idle",
            self.output.name(),
            self.config.standby_delay_ms
        );
        self.output.standby();
        self.standby = true;
        self.stats.set_standby(true);
    }

    fn exit_standby(&mut self) {
        if self.standby {
            log::debug!("Output '{}' leaving standby", self.output.name());
            self.output.exit_standby();
            self.standby = false;
            self.stats.set_standby(false);
        }
    }

    /// Take back providers the fast path has retired
    fn reclaim_returns(&mut self) {
        let Some(fast) = self.output.fast_path() else {
            return;
        };
        let tracks = &mut self.tracks;
        fast.drain_returns(|attachment| {
            let owner = tracks.values_mut().find(|track| {
                track.provider.is_none()
                    && track.placement
                        == Placement::Fast {
                            slot: attachment.slot,
                            generation: None,
                        }
            });
            match owner {
                Some(track) => track.provider = Some(attachment.provider),
                None => log::debug!("Dropping retired provider of fast slot {}", attachment.slot),
            }
        });
    }

    /// Drop terminated tracks whose providers are home
    fn reclaim_terminated(&mut self) {
        let done: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|track| track.state == TrackState::Terminated && track.is_home())
            .map(|track| track.id)
            .collect();
        for id in done {
            let Some(track) = self.tracks.remove(&id) else {
                continue;
            };
            if let Placement::Fast { slot, .. } = track.placement {
                if let Some(fast) = self.output.fast_path() {
                    fast.release_slot(slot);
                }
            }
            log::info!("{} destroyed", id);
        }
    }

    /// Idle the output, then tear down every track
    fn shutdown(&mut self) -> Option<Box<dyn OutputSink>> {
        log::info!("Control loop shutting down with {} tracks", self.tracks.len());
        let sink = self.output.shutdown();
        self.reclaim_returns();
        for track in self.tracks.values_mut() {
            if let Placement::Normal { slot: Some(slot) } = track.placement {
                let _ = self.mixer.release(slot);
            }
        }
        self.tracks.clear();
        sink
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-track step
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a track step touches besides the track
struct Cycle<'a> {
    config: &'a EngineConfig,
    mixer: &'a mut AudioMixer,
    output: &'a mut Box<dyn OutputStrategy>,
    effects: &'a EffectSessions,
    stats: &'a ControlStats,
    mixed_frames: u64,
    presented_frames: u64,
}

impl Cycle<'_> {
    fn step(&mut self, track: &mut ControlTrack) {
        let underruns = track.shared.underruns();
        let delta = underruns.wrapping_sub(track.last_underruns);
        track.last_underruns = underruns;

        match track.placement {
            Placement::Normal { .. } => self.step_normal(track),
            Placement::Fast { .. } => self.step_fast(track, delta),
        }
    }

    /// Retry budget exhausted: out of the mix until the client writes again
    fn disable(&mut self, track: &mut ControlTrack) {
        log::warn!(
            "{} starved for {} cycles, removing from mix",
            track.id,
            track.retries.used()
        );
        match track.placement {
            Placement::Normal { .. } => self.evict(track),
            Placement::Fast { .. } => self.detach_fast(track),
        }
        track.shared.set_flags(TRACK_DISABLED);
        track.fill = FillStatus::Filling;
        track.retries.refill();
        track.set_state(TrackState::Idle);
        self.stats.record_disabled();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Normal tracks
    // ─────────────────────────────────────────────────────────────────────

    fn step_normal(&mut self, track: &mut ControlTrack) {
        match track.state {
            TrackState::Idle | TrackState::Paused | TrackState::Terminated => self.evict(track),
            TrackState::Stopped | TrackState::Flushed => {
                self.evict(track);
                if let Some(provider) = track.provider.as_mut() {
                    provider.reset();
                }
                track.set_state(TrackState::Idle);
            }
            TrackState::Stopping2 => {
                self.evict(track);
                if self.presented_frames >= track.stop_target {
                    track.set_state(TrackState::Stopped);
                }
            }
            TrackState::Resuming | TrackState::Active | TrackState::Pausing | TrackState::Stopping1 => {
                let Some(slot) = self.admit(track) else {
                    return;
                };
                self.refresh(track, slot);
                let ready = self.mixer.frames_ready(slot);
                match track.state {
                    TrackState::Pausing => {
                        if ready == 0 || !self.mixer.is_ramping(slot) {
                            track.set_state(TrackState::Paused);
                            self.evict(track);
                        } else {
                            let _ = self.mixer.enable(slot);
                        }
                    }
                    TrackState::Stopping1 => {
                        if ready == 0 {
                            track.stop_target = self.mixed_frames;
                            track.set_state(TrackState::Stopping2);
                            self.evict(track);
                        } else {
                            let _ = self.mixer.enable(slot);
                        }
                    }
                    _ => self.check_ready(track, slot, ready),
                }
            }
        }
    }

    /// Mix an active track this cycle only if a full cycle is buffered
    fn check_ready(&mut self, track: &mut ControlTrack, slot: usize, ready: usize) {
        if track.fill == FillStatus::Filled {
            track.fill = FillStatus::Active;
        }
        if ready >= frames_needed(self.config, track.rate) {
            if track.fill == FillStatus::Filling {
                track.fill = FillStatus::Filled;
            }
            track.retries.refill();
            if track.state == TrackState::Resuming {
                track.set_state(TrackState::Active);
            }
            let _ = self.mixer.enable(slot);
            return;
        }

        let _ = self.mixer.disable(slot);
        if track.fill == FillStatus::Filling {
            // Pre-roll: starving is expected
            return;
        }
        track.shared.record_underrun();
        if track.retries.starve() {
            self.disable(track);
        }
    }

    /// Put a track in a mixer slot (disabled until ready)
    fn admit(&mut self, track: &mut ControlTrack) -> Option<usize> {
        if let Placement::Normal { slot: Some(slot) } = track.placement {
            return Some(slot);
        }
        let provider = track.provider.take()?;
        let slot = match self.mixer.allocate() {
            Ok(slot) => slot,
            Err(e) => {
                log::debug!("{} waiting for a mixer slot: {}", track.id, e);
                track.provider = Some(provider);
                return None;
            }
        };

        let rate = track.requested_rate();
        let configured = self
            .mixer
            .set_buffer_provider(slot, Some(provider))
            .and_then(|_| self.mixer.set_format(slot, track.channels, rate))
            .and_then(|_| self.mixer.set_volume(slot, StereoGain::SILENT, false));
        if let Err(e) = configured {
            log::warn!("{} cannot be mixed: {}", track.id, e);
            track.provider = self.mixer.release(slot).ok().flatten();
            track.set_state(TrackState::Stopped);
            return None;
        }

        log::debug!("{} admitted to mixer slot {} at {}Hz", track.id, slot, rate);
        track.rate = rate;
        track.placement = Placement::Normal { slot: Some(slot) };
        Some(slot)
    }

    /// Take a track out of the mixer, bringing its provider home
    fn evict(&mut self, track: &mut ControlTrack) {
        if let Placement::Normal { slot: Some(slot) } = track.placement {
            if let Ok(provider) = self.mixer.release(slot) {
                track.provider = provider;
            }
            track.placement = Placement::Normal { slot: None };
            track.rate = 0;
        }
    }

    /// Push rate, volume and routing changes into the mixer slot
    fn refresh(&mut self, track: &mut ControlTrack, slot: usize) {
        let rate = track.requested_rate();
        if rate != track.rate {
            match self.mixer.set_format(slot, track.channels, rate) {
                Ok(()) => log::debug!("{} rate {} -> {}Hz", track.id, track.rate, rate),
                Err(e) => log::warn!("{} cannot play at {}Hz: {}", track.id, rate, e),
            }
            track.rate = rate;
        }

        let (volume, aux) = if track.state == TrackState::Pausing {
            (StereoGain::SILENT, 0.0)
        } else {
            (track.shared.volume(), track.shared.aux_level())
        };
        let _ = self.mixer.set_volume(slot, volume, true);
        let _ = self.mixer.set_aux_level(slot, aux, true);
        let _ = self.mixer.set_output(slot, self.effects.output_for(track.session));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fast tracks
    // ─────────────────────────────────────────────────────────────────────

    fn step_fast(&mut self, track: &mut ControlTrack, underruns: u32) {
        match track.state {
            TrackState::Idle | TrackState::Paused | TrackState::Terminated => self.detach_fast(track),
            TrackState::Stopped | TrackState::Flushed => {
                self.detach_fast(track);
                // The provider may still be on its way back
                if let Some(provider) = track.provider.as_mut() {
                    provider.reset();
                    track.set_state(TrackState::Idle);
                }
            }
            TrackState::Pausing => {
                self.detach_fast(track);
                track.set_state(TrackState::Paused);
            }
            TrackState::Stopping1 => {
                if !self.attached(track) {
                    track.set_state(TrackState::Stopped);
                } else if underruns > 0 {
                    // The buffered tail has played out
                    track.stop_target = track.shared.frames_released();
                    track.set_state(TrackState::Stopping2);
                }
            }
            TrackState::Stopping2 => {
                if track.shared.timestamp().frames >= track.stop_target {
                    self.detach_fast(track);
                    track.set_state(TrackState::Stopped);
                }
            }
            TrackState::Active | TrackState::Resuming => {
                if !self.attached(track) {
                    self.attach_fast(track);
                    return;
                }
                let released = track.shared.frames_released();
                let progressed = released > track.last_released;
                track.last_released = released;

                if progressed {
                    track.fill = match track.fill {
                        FillStatus::Filling => FillStatus::Filled,
                        _ => FillStatus::Active,
                    };
                    track.retries.refill();
                    if track.state == TrackState::Resuming {
                        track.set_state(TrackState::Active);
                    }
                } else if underruns > 0 && track.fill != FillStatus::Filling && track.retries.starve() {
                    self.disable(track);
                }
            }
        }
    }

    fn attached(&self, track: &ControlTrack) -> bool {
        matches!(
            track.placement,
            Placement::Fast {
                generation: Some(_),
                ..
            }
        )
    }

    fn attach_fast(&mut self, track: &mut ControlTrack) {
        let Placement::Fast {
            slot,
            generation: None,
        } = track.placement
        else {
            return;
        };
        // Still on its way back from a previous attachment
        let Some(provider) = track.provider.take() else {
            return;
        };
        let Some(fast) = self.output.fast_path() else {
            track.provider = Some(provider);
            return;
        };
        match fast.activate(slot, track.channels, provider, Some(track.shared.clone())) {
            Ok(generation) => {
                log::debug!("{} attached to fast slot {} (generation {})", track.id, slot, generation);
                track.placement = Placement::Fast {
                    slot,
                    generation: Some(generation),
                };
                track.last_released = track.shared.frames_released();
            }
            Err(provider) => {
                log::warn!("{}: fast attachment queue full, retrying", track.id);
                track.provider = Some(provider);
            }
        }
    }

    /// Retire a track's fast slot; blocks until the fast path let go
    fn detach_fast(&mut self, track: &mut ControlTrack) {
        if let Placement::Fast {
            slot,
            generation: Some(_),
        } = track.placement
        {
            if let Some(fast) = self.output.fast_path() {
                fast.deactivate(slot);
            }
            track.placement = Placement::Fast {
                slot,
                generation: None,
            };
            log::debug!("{} detached from fast slot {}", track.id, slot);
        }
    }
}
