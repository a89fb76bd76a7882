use std::sync::Arc;
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer};

use super::gate::ColdIdleGate;
use super::state::{FastCommand, FastMixerState};
use super::stats::{FastMixerStats, FillClass, Warmup};
use super::FastAttachment;
use crate::config::{EngineConfig, UnderrunPolicy, MAX_FAST_TRACKS};
use crate::mixer::{AudioMixer, MixerSettings};
use crate::sink::{OutputConverter, OutputSink, SinkFormat};
use crate::state_queue::StateObserver;
use crate::track::{SharedTrack, TrackTimestamp};

/// Where a track's newest released frame landed on the sink timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReleaseMark {
    /// Track frames released as of the write
    released: u64,
    /// Sink frames written once that write completed
    written: u64,
}

impl ReleaseMark {
    /// Track frames presented once the sink reaches `position`
    fn presented(&self, position: u64) -> u64 {
        self.released.saturating_sub(self.written.saturating_sub(position))
    }
}

/// `a` was issued after `b` (slot generations wrap)
#[inline]
fn newer_generation(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// What the thread loop should do after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Run the next cycle right away (the sink write paces the loop)
    Continue,
    /// Sleep for a period, then poll again
    HotIdle,
    /// Park on the cold-idle gate
    ColdIdle,
    /// Leave the loop
    Exit,
}

/// The fast path's mixing state, driven one cycle at a time
///
/// Owns its mixer, the sink and every provider attached to it. Providers
/// arrive on the attachment queue ahead of the state that activates them
/// and leave on the return queue once a state retires or supersedes them,
/// so nothing is allocated or freed here.
pub struct FastMixer {
    observer: StateObserver<FastMixerState>,
    state: FastMixerState,
    attachments: Consumer<FastAttachment>,
    returns: Producer<FastAttachment>,
    /// Attachments received but not yet named by a state
    pending: [Option<FastAttachment>; MAX_FAST_TRACKS],
    /// Track behind each installed slot (None for the pipe)
    tracks: [Option<SharedTrack>; MAX_FAST_TRACKS],
    /// Generation installed in each slot (0 = empty)
    installed: [u32; MAX_FAST_TRACKS],
    marks: [ReleaseMark; MAX_FAST_TRACKS],
    /// Retired attachments waiting for room on the return queue
    unreturned: Vec<FastAttachment>,
    mixer: AudioMixer,
    sink: Box<dyn OutputSink>,
    converter: OutputConverter,
    gate: Arc<ColdIdleGate>,
    stats: Arc<FastMixerStats>,
    underrun: UnderrunPolicy,
    full_frames: usize,
    period: Duration,
    warmup: Warmup,
    last_cycle: Option<Instant>,
    origin: Instant,
    /// Sink frames written since start
    frames_written: u64,
    cold_gen: u32,
    idle: bool,
}

impl FastMixer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        sink: Box<dyn OutputSink>,
        sink_format: SinkFormat,
        observer: StateObserver<FastMixerState>,
        attachments: Consumer<FastAttachment>,
        returns: Producer<FastAttachment>,
        gate: Arc<ColdIdleGate>,
        stats: Arc<FastMixerStats>,
    ) -> Self {
        let mixer = AudioMixer::new(MixerSettings::fast(config));
        let initial = *observer.current();
        Self {
            state: initial,
            observer,
            attachments,
            returns,
            pending: std::array::from_fn(|_| None),
            tracks: std::array::from_fn(|_| None),
            installed: [0; MAX_FAST_TRACKS],
            marks: [ReleaseMark::default(); MAX_FAST_TRACKS],
            unreturned: Vec::with_capacity(MAX_FAST_TRACKS * 2),
            converter: OutputConverter::new(sink_format, config.fast_frame_count),
            mixer,
            sink,
            gate,
            stats,
            underrun: config.underrun,
            full_frames: config.fast_full_frames(),
            period: config.fast_period(),
            warmup: Warmup::new(config.warmup),
            last_cycle: None,
            origin: Instant::now(),
            frames_written: 0,
            cold_gen: initial.cold_gen,
            idle: true,
        }
    }

    pub fn gate(&self) -> &Arc<ColdIdleGate> {
        &self.gate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }

    pub fn stats(&self) -> &Arc<FastMixerStats> {
        &self.stats
    }

    /// Take the sink back (after the thread loop ends)
    pub fn into_sink(self) -> Box<dyn OutputSink> {
        self.sink
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cycle
    // ─────────────────────────────────────────────────────────────────────

    /// Run one cycle at time `now`
    pub fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        self.flush_returns();
        if let Some(next) = self.observer.poll() {
            let next = *next;
            self.apply_state(next);
        }

        match self.state.command {
            FastCommand::Exit => return CycleOutcome::Exit,
            FastCommand::ColdIdle => {
                if !self.idle || self.cold_gen != self.state.cold_gen {
                    self.cold_gen = self.state.cold_gen;
                    self.enter_idle();
                    self.sink.standby();
                }
                return CycleOutcome::ColdIdle;
            }
            FastCommand::HotIdle => {
                if !self.idle {
                    self.enter_idle();
                }
                return CycleOutcome::HotIdle;
            }
            FastCommand::Mix | FastCommand::Write | FastCommand::MixWrite => {}
        }
        self.idle = false;

        self.stats.record_cycle();
        if let Some(last) = self.last_cycle {
            if self.warmup.observe(now.saturating_duration_since(last), self.period) {
                self.stats.set_warmed_up(true);
            }
        }
        if !self.warmup.is_done() {
            self.stats.record_warmup_cycle();
        }
        self.last_cycle = Some(now);

        if self.state.command.mixes() {
            self.prepare_tracks();
            self.mixer.process();
        }
        if self.state.command.writes() {
            self.write();
        }

        if self.warmup.is_done() {
            self.stats.record_steady_cycle(now.elapsed(), self.period);
        }
        CycleOutcome::Continue
    }

    /// Timing restarts from scratch after any idle stretch
    fn enter_idle(&mut self) {
        self.idle = true;
        self.warmup.reset();
        self.stats.set_warmed_up(false);
        self.last_cycle = None;
    }

    /// Refresh volume and classify each active slot's fill level
    fn prepare_tracks(&mut self) {
        for slot in self.state.active_slots() {
            if let Some(track) = &self.tracks[slot] {
                let _ = self.mixer.set_volume(slot, track.volume(), true);
                let _ = self.mixer.set_aux_level(slot, track.aux_level(), true);
            }

            let ready = self.mixer.frames_ready(slot);
            let class = if ready >= self.full_frames {
                FillClass::Full
            } else if ready > 0 {
                FillClass::Partial
            } else {
                FillClass::Empty
            };
            self.stats.record_fill(slot, class);

            let mix = match class {
                FillClass::Full => true,
                FillClass::Partial => self.underrun.mix_partial,
                FillClass::Empty => false,
            };
            if class == FillClass::Empty {
                if let Some(track) = &self.tracks[slot] {
                    track.record_underrun();
                }
            }
            let _ = if mix {
                self.mixer.enable(slot)
            } else {
                self.mixer.disable(slot)
            };
        }
    }

    fn write(&mut self) {
        let frames = self.mixer.frame_count();
        let bytes = self.converter.convert(&self.mixer.output(0).as_slice()[..frames]);
        match self.sink.write(bytes, frames) {
            Ok(written) => {
                self.frames_written += written as u64;
                self.stats.record_write(frames, written);
                self.mark_releases();
                self.attribute_timestamp();
            }
            Err(_) => self.stats.record_write_error(),
        }
    }

    /// Note the sink position behind each track's newest released frame
    fn mark_releases(&mut self) {
        for slot in self.state.active_slots() {
            if let Some(track) = &self.tracks[slot] {
                let released = track.frames_released();
                if released != self.marks[slot].released {
                    self.marks[slot] = ReleaseMark {
                        released,
                        written: self.frames_written,
                    };
                }
            }
        }
    }

    /// Tell every active track how much of its audio has been presented
    ///
    /// A track that stopped releasing is fully presented once the sink
    /// passes the write that carried its last frame, however much newer
    /// audio follows it.
    fn attribute_timestamp(&mut self) {
        let Some(timestamp) = self.sink.timestamp() else {
            return;
        };
        self.stats.set_frames_presented(timestamp.position);
        let time_ns = timestamp
            .time
            .saturating_duration_since(self.origin)
            .as_nanos() as u64;

        for slot in self.state.active_slots() {
            if let Some(track) = &self.tracks[slot] {
                track.set_timestamp(TrackTimestamp {
                    frames: self.marks[slot].presented(timestamp.position),
                    time_ns,
                });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // State transitions
    // ─────────────────────────────────────────────────────────────────────

    fn apply_state(&mut self, next: FastMixerState) {
        while let Ok(attachment) = self.attachments.pop() {
            let slot = attachment.slot;
            match self.pending[slot].take() {
                Some(held) if newer_generation(held.generation, attachment.generation) => {
                    self.pending[slot] = Some(held);
                    self.return_attachment(attachment);
                }
                Some(held) => {
                    self.pending[slot] = Some(attachment);
                    self.return_attachment(held);
                }
                None => self.pending[slot] = Some(attachment),
            }
        }

        // Retire slots the new state no longer runs
        for slot in self.state.active_slots() {
            let generation = self.installed[slot];
            if !next.is_active(slot) || next.tracks[slot].generation != generation {
                self.detach(slot);
            }
        }

        // Install newly activated slots
        for slot in next.active_slots() {
            let desc = next.tracks[slot];
            if self.installed[slot] == desc.generation {
                continue;
            }
            let matches = self.pending[slot]
                .as_ref()
                .is_some_and(|pending| pending.generation == desc.generation);
            assert!(
                matches,
                "fast slot {} active at generation {} without an attachment",
                slot,
                desc.generation
            );
            if let Some(attachment) = self.pending[slot].take() {
                self.attach(slot, desc.channels as usize, attachment);
            }
        }

        // An attachment is pushed before the state naming it, so one the
        // state has not named yet waits. Only a descriptor at its
        // generation or later (active or since retired) makes it stale.
        for slot in 0..MAX_FAST_TRACKS {
            let named = next.tracks[slot].generation;
            let stale = self.pending[slot]
                .as_ref()
                .is_some_and(|pending| !newer_generation(pending.generation, named));
            if stale {
                if let Some(attachment) = self.pending[slot].take() {
                    self.return_attachment(attachment);
                }
            }
        }

        if next.frame_count != 0 && next.frame_count != self.mixer.frame_count() {
            let _ = self.mixer.set_frame_count(next.frame_count);
        }
        self.state = next;
    }

    fn attach(&mut self, slot: usize, channels: usize, attachment: FastAttachment) {
        let FastAttachment {
            generation,
            provider,
            track,
            ..
        } = attachment;
        let rate = self.mixer.sample_rate();
        let installed = self.mixer.allocate_at(slot).is_ok()
            && self.mixer.set_buffer_provider(slot, Some(provider)).is_ok()
            && self.mixer.set_format(slot, channels, rate).is_ok();
        debug_assert!(installed, "fast slot {} rejected its attachment", slot);

        if let Some(track) = &track {
            let _ = self.mixer.set_volume(slot, track.volume(), false);
            let _ = self.mixer.set_aux_level(slot, track.aux_level(), false);
        }
        let _ = self.mixer.enable(slot);
        self.marks[slot] = ReleaseMark {
            released: track.as_ref().map_or(0, |track| track.frames_released()),
            written: self.frames_written,
        };
        self.tracks[slot] = track;
        self.installed[slot] = generation;
    }

    fn detach(&mut self, slot: usize) {
        let generation = std::mem::take(&mut self.installed[slot]);
        let track = self.tracks[slot].take();
        if let Ok(Some(provider)) = self.mixer.release(slot) {
            self.return_attachment(FastAttachment {
                slot,
                generation,
                provider,
                track,
            });
        }
    }

    /// Hand a retired attachment back for the control loop to free
    fn return_attachment(&mut self, attachment: FastAttachment) {
        if !self.unreturned.is_empty() {
            self.park(attachment);
            return;
        }
        if let Err(rtrb::PushError::Full(attachment)) = self.returns.push(attachment) {
            self.park(attachment);
        }
    }

    /// Hold an attachment until the return queue has room
    ///
    /// At most one attachment per slot is pending and one installed, which
    /// is the parking capacity, so this never reallocates.
    fn park(&mut self, attachment: FastAttachment) {
        debug_assert!(self.unreturned.len() < self.unreturned.capacity());
        if self.unreturned.len() < self.unreturned.capacity() {
            self.unreturned.push(attachment);
        } else {
            // Freeing here would block the cycle; leak instead
            std::mem::forget(attachment);
        }
    }

    /// Retry parked returns, oldest first
    fn flush_returns(&mut self) {
        let sent = self.returns.slots().min(self.unreturned.len());
        for attachment in self.unreturned.drain(..sent) {
            let _ = self.returns.push(attachment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fast::FastTrackDesc;
    use crate::provider::{track_ring, TrackWriter, VecProvider};
    use crate::error::SinkResult;
    use crate::sink::{CaptureHandle, CaptureSink, SinkTimestamp};
    use crate::state_queue::{state_queue, PushMode, StateMutator};
    use crate::track::TrackShared;
    use crate::types::{SampleFormat, TrackFormat};
    use rtrb::RingBuffer;

    const FRAMES: usize = 16;

    struct Rig {
        mixer: FastMixer,
        mutator: StateMutator<FastMixerState>,
        attach: Producer<FastAttachment>,
        returns: Consumer<FastAttachment>,
        capture: CaptureHandle,
        stats: Arc<FastMixerStats>,
    }

    /// Capture sink whose presentation trails its writes by `lag` frames
    struct LaggingSink {
        inner: CaptureSink,
        lag: u64,
    }

    impl OutputSink for LaggingSink {
        fn name(&self) -> &str {
            "lagging"
        }

        fn negotiate(&mut self, candidates: &[SinkFormat]) -> SinkResult<SinkFormat> {
            self.inner.negotiate(candidates)
        }

        fn write(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
            self.inner.write(data, frames)
        }

        fn timestamp(&self) -> Option<SinkTimestamp> {
            self.inner.timestamp().map(|ts| SinkTimestamp {
                position: ts.position.saturating_sub(self.lag),
                time: ts.time,
            })
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            frame_count: 64,
            fast_frame_count: FRAMES,
            ..EngineConfig::default()
        }
    }

    fn build(config: EngineConfig, lag: u64, return_capacity: usize) -> Rig {
        let (inner, capture) = CaptureSink::new(&[SampleFormat::F32]);
        let mut sink = LaggingSink { inner, lag };
        let format = sink
            .negotiate(&[SinkFormat::new(SampleFormat::F32, config.sample_rate)])
            .unwrap();
        let (mutator, observer) = state_queue(FastMixerState::new());
        let (attach, attachments) = RingBuffer::new(MAX_FAST_TRACKS * 2);
        let (returns_tx, returns) = RingBuffer::new(return_capacity);
        let stats = Arc::new(FastMixerStats::new());
        let mixer = FastMixer::new(
            &config,
            Box::new(sink),
            format,
            observer,
            attachments,
            returns_tx,
            Arc::new(ColdIdleGate::new()),
            Arc::clone(&stats),
        );
        Rig {
            mixer,
            mutator,
            attach,
            returns,
            capture,
            stats,
        }
    }

    fn rig_with(config: EngineConfig) -> Rig {
        build(config, 0, MAX_FAST_TRACKS * 2)
    }

    fn rig() -> Rig {
        rig_with(config())
    }

    impl Rig {
        fn activate(&mut self, slot: usize, generation: u32, attachment: FastAttachment) {
            self.attach.push(attachment).unwrap();
            let state = self.mutator.begin();
            state.command = FastCommand::MixWrite;
            state.frame_count = FRAMES;
            state.activate(slot, FastTrackDesc { generation, channels: 2 });
            assert!(self.mutator.push(PushMode::Never));
        }

        /// Publish `slot` at `generation` without sending an attachment
        fn activate_only(&mut self, slot: usize, generation: u32) {
            let state = self.mutator.begin();
            state.command = FastCommand::MixWrite;
            state.frame_count = FRAMES;
            state.activate(slot, FastTrackDesc { generation, channels: 2 });
            assert!(self.mutator.push(PushMode::Never));
        }

        fn cycle(&mut self) -> CycleOutcome {
            self.mixer.run_cycle(Instant::now())
        }
    }

    fn ring_attachment(slot: usize, generation: u32) -> (FastAttachment, TrackWriter, SharedTrack) {
        let shared = TrackShared::new_shared();
        let (writer, source) = track_ring(TrackFormat::stereo_f32(48000), 64, shared.clone());
        let attachment = FastAttachment {
            slot,
            generation,
            provider: Box::new(source),
            track: Some(shared.clone()),
        };
        (attachment, writer, shared)
    }

    fn write_frames(writer: &mut TrackWriter, frames: usize, value: f32) {
        let bytes: Vec<u8> = std::iter::repeat(value)
            .take(frames * 2)
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        assert_eq!(writer.write(&bytes), frames);
    }

    #[test]
    fn test_mixes_and_writes_one_period() {
        let mut rig = rig();
        let provider = VecProvider::new(vec![0.5; FRAMES * 2 * 3], 2);
        rig.activate(
            1,
            1,
            FastAttachment {
                slot: 1,
                generation: 1,
                provider: Box::new(provider),
                track: None,
            },
        );

        assert_eq!(rig.cycle(), CycleOutcome::Continue);
        assert_eq!(rig.capture.frames(), FRAMES as u64);
        assert!(rig.capture.samples().iter().all(|&s| s == 0.5));
        assert_eq!(rig.stats.snapshot().frames_written, FRAMES as u64);
    }

    #[test]
    fn test_single_empty_cycle_counts_one_underrun() {
        let mut rig = rig();
        let (attachment, mut writer, shared) = ring_attachment(1, 1);
        rig.activate(1, 1, attachment);

        write_frames(&mut writer, FRAMES, 0.25);
        rig.cycle();
        assert!(rig.mixer.mixer().is_enabled(1));

        // Nothing written: skipped for exactly this cycle
        rig.cycle();
        assert!(!rig.mixer.mixer().is_enabled(1));
        assert_eq!(shared.underruns(), 1);

        write_frames(&mut writer, FRAMES, 0.25);
        rig.cycle();
        assert!(rig.mixer.mixer().is_enabled(1));

        let counters = rig.stats.track(1).unwrap();
        assert_eq!((counters.full, counters.partial, counters.empty), (2, 0, 1));
        assert_eq!(counters.last, FillClass::Full);
        assert_eq!(shared.underruns(), 1);

        let samples = rig.capture.samples();
        let period = FRAMES * 2;
        assert!(samples[period..2 * period].iter().all(|&s| s == 0.0));
        assert!(samples[2 * period..].iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_partial_fill_skipped_when_configured() {
        let mut config = config();
        config.underrun.mix_partial = false;
        let mut rig = rig_with(config);
        let (attachment, mut writer, shared) = ring_attachment(2, 1);
        rig.activate(2, 1, attachment);

        write_frames(&mut writer, FRAMES / 2, 0.5);
        rig.cycle();
        assert!(!rig.mixer.mixer().is_enabled(2));
        assert_eq!(rig.stats.track(2).unwrap().partial, 1);
        // Partial cycles are not underruns
        assert_eq!(shared.underruns(), 0);
    }

    #[test]
    fn test_timestamp_attributed_to_tracks() {
        let mut rig = rig();
        let (attachment, mut writer, shared) = ring_attachment(1, 1);
        rig.activate(1, 1, attachment);

        write_frames(&mut writer, FRAMES, 0.1);
        rig.cycle();
        // The capture sink presents everything as soon as it is written
        assert_eq!(shared.timestamp().frames, FRAMES as u64);
        assert_eq!(rig.stats.snapshot().frames_presented, FRAMES as u64);
    }

    #[test]
    fn test_retired_attachments_are_returned() {
        let mut rig = rig();
        let (attachment, _writer, _shared) = ring_attachment(3, 7);
        rig.activate(3, 7, attachment);
        rig.cycle();
        assert!(rig.returns.pop().is_err());

        rig.mutator.begin().deactivate(3);
        assert!(rig.mutator.push(PushMode::Never));
        rig.cycle();

        let returned = rig.returns.pop().unwrap();
        assert_eq!((returned.slot, returned.generation), (3, 7));
        assert!(returned.track.is_some());
        assert!(!rig.mixer.mixer().is_allocated(3));
    }

    #[test]
    fn test_attachment_waits_for_the_state_naming_it() {
        let mut rig = rig();
        rig.mutator.begin().command = FastCommand::MixWrite;
        rig.mutator.begin().frame_count = FRAMES;
        assert!(rig.mutator.push(PushMode::Never));

        // Arrives while an older state is being applied
        let (attachment, mut writer, _shared) = ring_attachment(1, 1);
        rig.attach.push(attachment).unwrap();
        rig.cycle();
        assert!(rig.returns.pop().is_err());
        assert!(!rig.mixer.mixer().is_allocated(1));

        rig.mutator
            .begin()
            .activate(1, FastTrackDesc { generation: 1, channels: 2 });
        assert!(rig.mutator.push(PushMode::Never));
        write_frames(&mut writer, FRAMES, 0.5);
        rig.cycle();
        assert!(rig.mixer.mixer().is_allocated(1));
        assert!(rig.capture.samples()[FRAMES * 2..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_attachment_retired_before_running_is_returned() {
        let mut rig = rig();
        let (attachment, _writer, _shared) = ring_attachment(4, 2);
        rig.attach.push(attachment).unwrap();
        let state = rig.mutator.begin();
        state.command = FastCommand::MixWrite;
        state.activate(4, FastTrackDesc { generation: 2, channels: 2 });
        state.deactivate(4);
        assert!(rig.mutator.push(PushMode::Never));
        rig.cycle();

        let returned = rig.returns.pop().unwrap();
        assert_eq!((returned.slot, returned.generation), (4, 2));
        assert!(!rig.mixer.mixer().is_allocated(4));
    }

    #[test]
    fn test_older_attachment_replaced_by_newer() {
        let mut rig = rig();
        let (old, _w1, _s1) = ring_attachment(2, 1);
        let (new, _w2, _s2) = ring_attachment(2, 2);
        rig.attach.push(old).unwrap();
        rig.attach.push(new).unwrap();
        rig.activate_only(2, 2);
        rig.cycle();

        assert_eq!(rig.returns.pop().unwrap().generation, 1);
        assert!(rig.mixer.mixer().is_allocated(2));
    }

    #[test]
    fn test_drained_track_fully_presented_behind_newer_audio() {
        let mut rig = build(config(), FRAMES as u64, MAX_FAST_TRACKS * 2);
        let (attachment, mut writer, shared) = ring_attachment(1, 1);
        rig.activate(1, 1, attachment);
        write_frames(&mut writer, FRAMES * 2, 0.25);

        rig.cycle();
        assert_eq!(shared.timestamp().frames, 0);
        rig.cycle();
        assert_eq!(shared.timestamp().frames, FRAMES as u64);

        // Drained: the output keeps writing, the tail still gets presented
        rig.cycle();
        assert_eq!(shared.frames_released(), FRAMES as u64 * 2);
        assert_eq!(shared.timestamp().frames, FRAMES as u64 * 2);
        rig.cycle();
        assert_eq!(shared.timestamp().frames, FRAMES as u64 * 2);
    }

    #[test]
    fn test_returns_parked_while_queue_full() {
        let mut rig = build(config(), 0, 1);
        let (first, _w1, _s1) = ring_attachment(1, 1);
        let (second, _w2, _s2) = ring_attachment(2, 1);
        rig.attach.push(first).unwrap();
        rig.attach.push(second).unwrap();
        let state = rig.mutator.begin();
        state.command = FastCommand::MixWrite;
        state.activate(1, FastTrackDesc { generation: 1, channels: 2 });
        state.activate(2, FastTrackDesc { generation: 1, channels: 2 });
        assert!(rig.mutator.push(PushMode::Never));
        rig.cycle();

        let state = rig.mutator.begin();
        state.deactivate(1);
        state.deactivate(2);
        assert!(rig.mutator.push(PushMode::Never));
        rig.cycle();
        assert_eq!(rig.returns.pop().unwrap().slot, 1);
        assert!(rig.returns.pop().is_err());

        rig.cycle();
        assert_eq!(rig.returns.pop().unwrap().slot, 2);
    }

    #[test]
    fn test_mix_and_write_commands_run_separately() {
        let mut rig = rig();
        let (attachment, mut writer, shared) = ring_attachment(1, 1);
        write_frames(&mut writer, FRAMES * 2, 0.5);
        rig.attach.push(attachment).unwrap();
        let state = rig.mutator.begin();
        state.command = FastCommand::Mix;
        state.frame_count = FRAMES;
        state.activate(1, FastTrackDesc { generation: 1, channels: 2 });
        assert!(rig.mutator.push(PushMode::Never));

        rig.cycle();
        assert_eq!(shared.frames_released(), FRAMES as u64);
        assert_eq!(rig.capture.frames(), 0);

        rig.mutator.begin().command = FastCommand::Write;
        assert!(rig.mutator.push(PushMode::Never));
        rig.cycle();
        assert_eq!(shared.frames_released(), FRAMES as u64);
        assert_eq!(rig.capture.frames(), FRAMES as u64);
        assert!(rig.capture.samples().iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_cold_idle_parks_until_told_otherwise() {
        let mut rig = rig();
        assert_eq!(rig.cycle(), CycleOutcome::ColdIdle);
        // A wake without a new state just parks again
        assert_eq!(rig.cycle(), CycleOutcome::ColdIdle);

        rig.mutator.begin().command = FastCommand::HotIdle;
        rig.mutator.push(PushMode::Never);
        assert_eq!(rig.cycle(), CycleOutcome::HotIdle);

        rig.mutator.begin().command = FastCommand::MixWrite;
        rig.mutator.push(PushMode::Never);
        assert_eq!(rig.cycle(), CycleOutcome::Continue);

        let state = rig.mutator.begin();
        state.command = FastCommand::ColdIdle;
        state.cold_gen += 1;
        rig.mutator.push(PushMode::Never);
        assert_eq!(rig.cycle(), CycleOutcome::ColdIdle);
        assert!(!rig.stats.snapshot().warmed_up);

        rig.mutator.begin().command = FastCommand::Exit;
        rig.mutator.push(PushMode::Never);
        assert_eq!(rig.cycle(), CycleOutcome::Exit);
    }

    #[test]
    fn test_write_errors_are_counted() {
        let mut rig = rig();
        rig.mutator.begin().command = FastCommand::MixWrite;
        rig.mutator.push(PushMode::Never);
        rig.capture.fail_next_writes(1);

        rig.cycle();
        rig.cycle();
        let stats = rig.stats.snapshot();
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.frames_written, FRAMES as u64);
        assert_eq!(stats.cycles, 2);
    }
}
