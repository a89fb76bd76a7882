//! Where the control loop's mix goes
//!
//! The control loop is one driver parameterized by an [`OutputStrategy`]:
//! [`DirectOutput`] writes each mix period straight to the sink, while
//! [`FastPathOutput`] feeds it through the pipe to the fast path, which
//! owns the sink and also runs the fast tracks.

use std::sync::Arc;
use std::thread::JoinHandle;

use rtrb::{Consumer, Producer, RingBuffer};

use super::slots::{FastSlotPool, PIPE_SLOT};
use crate::config::{EngineConfig, MAX_FAST_TRACKS};
use crate::error::{MixerError, MixerResult};
use crate::fast::{
    spawn_fast_mixer, ColdIdleGate, FastAttachment, FastCommand, FastMixer, FastMixerState,
    FastMixerStats, FastTrackDesc,
};
use crate::provider::{pipe, BufferProvider, PipeWriter};
use crate::sink::{OutputConverter, OutputSink, SinkFormat};
use crate::state_queue::{state_queue, PushMode, StateMutator};
use crate::track::{SharedTrack, TrackShared};
use crate::types::StereoSample;

/// Write and standby behavior of the control loop
pub trait OutputStrategy: Send {
    fn name(&self) -> &'static str;

    /// Whether another mix period can be handed over now
    fn ready(&self) -> bool {
        true
    }

    /// Hand over one mix period; returns frames accepted
    fn write(&mut self, mix: &[StereoSample]) -> usize;

    /// Mix frames the hardware has presented so far
    fn presented_frames(&self) -> u64;

    fn standby(&mut self);

    fn exit_standby(&mut self);

    /// The fast path, for outputs that run one
    fn fast_path(&mut self) -> Option<&mut FastPathOutput> {
        None
    }

    /// Stop output and hand the sink back
    fn shutdown(&mut self) -> Option<Box<dyn OutputSink>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct
// ─────────────────────────────────────────────────────────────────────────────

/// Attempts to finish one period when the sink takes partial writes
const MAX_WRITE_ATTEMPTS: usize = 4;

/// Writes the mix straight to the sink
pub struct DirectOutput {
    sink: Option<Box<dyn OutputSink>>,
    converter: OutputConverter,
    write_errors: u64,
}

impl DirectOutput {
    pub fn new(sink: Box<dyn OutputSink>, format: SinkFormat, max_frames: usize) -> Self {
        Self {
            sink: Some(sink),
            converter: OutputConverter::new(format, max_frames),
            write_errors: 0,
        }
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }
}

impl OutputStrategy for DirectOutput {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn write(&mut self, mix: &[StereoSample]) -> usize {
        let Some(sink) = self.sink.as_mut() else {
            return 0;
        };
        let frame_size = self.converter.format().frame_size();
        let bytes = self.converter.convert(mix);

        let mut written = 0;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            if written == mix.len() {
                break;
            }
            match sink.write(&bytes[written * frame_size..], mix.len() - written) {
                Ok(0) => break,
                Ok(frames) => written += frames,
                Err(e) => {
                    self.write_errors += 1;
                    if self.write_errors == 1 || self.write_errors % 100 == 0 {
                        log::warn!("Sink '{}' write failed ({} total): {}", sink.name(), self.write_errors, e);
                    }
                    break;
                }
            }
        }
        written
    }

    fn presented_frames(&self) -> u64 {
        self.sink
            .as_ref()
            .and_then(|sink| sink.timestamp())
            .map_or(0, |timestamp| timestamp.position)
    }

    fn standby(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.standby();
        }
    }

    fn exit_standby(&mut self) {}

    fn shutdown(&mut self) -> Option<Box<dyn OutputSink>> {
        self.sink.take()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fast path
// ─────────────────────────────────────────────────────────────────────────────

/// Feeds the mix to the fast path and manages its slots
pub struct FastPathOutput {
    mutator: StateMutator<FastMixerState>,
    attachments: Producer<FastAttachment>,
    returns: Consumer<FastAttachment>,
    gate: Arc<ColdIdleGate>,
    stats: Arc<FastMixerStats>,
    thread: Option<JoinHandle<Box<dyn OutputSink>>>,
    pipe: PipeWriter,
    pipe_shared: SharedTrack,
    pool: FastSlotPool,
    /// Pipe fill level to keep topped up
    setpoint: usize,
    frame_count: usize,
    standby: bool,
}

impl FastPathOutput {
    /// Start the fast path thread on `sink`, idle until the first write
    pub fn start(config: &EngineConfig, sink: Box<dyn OutputSink>, format: SinkFormat) -> MixerResult<Self> {
        let (mutator, observer) = state_queue(FastMixerState::new());
        let (attachments, attachment_rx) = RingBuffer::new(MAX_FAST_TRACKS * 2);
        let (returns_tx, returns) = RingBuffer::new(MAX_FAST_TRACKS * 2);
        let gate = Arc::new(ColdIdleGate::new());
        let stats = Arc::new(FastMixerStats::new());

        let capacity = config.frame_count * config.pipe_depth_periods;
        let pipe_shared = TrackShared::new_shared();
        let (pipe_writer, pipe_source) = pipe(capacity, config.fast_frame_count, pipe_shared.clone());

        let mixer = FastMixer::new(
            config,
            sink,
            format,
            observer,
            attachment_rx,
            returns_tx,
            Arc::clone(&gate),
            Arc::clone(&stats),
        );
        let thread = spawn_fast_mixer(mixer).map_err(|e| MixerError::ThreadSpawn {
            name: "fast mixer",
            reason: e.to_string(),
        })?;

        let mut output = Self {
            mutator,
            attachments,
            returns,
            gate,
            stats,
            thread: Some(thread),
            pipe: pipe_writer,
            pipe_shared: pipe_shared.clone(),
            pool: FastSlotPool::new(config.fast_tracks),
            setpoint: config.pipe_setpoint_frames().min(capacity),
            frame_count: config.frame_count,
            standby: true,
        };

        output.mutator.begin().frame_count = config.fast_frame_count;
        output
            .activate(PIPE_SLOT, 2, Box::new(pipe_source), Some(pipe_shared))
            .map_err(|_| MixerError::NoFreeSlot)?;
        log::info!(
            "Fast path started: {} frames/cycle, {} slots, pipe {} frames",
            config.fast_frame_count,
            config.fast_tracks,
            capacity
        );
        Ok(output)
    }

    pub fn stats(&self) -> &Arc<FastMixerStats> {
        &self.stats
    }

    /// Frames waiting in the pipe
    pub fn pipe_fill(&self) -> usize {
        self.pipe.fill()
    }

    /// Apply a new pipe setpoint (power state change)
    pub fn set_setpoint(&mut self, frames: usize) {
        self.setpoint = frames.min(self.pipe.capacity());
    }

    pub fn lease_slot(&mut self) -> Option<usize> {
        self.pool.lease()
    }

    pub fn release_slot(&mut self, slot: usize) {
        self.pool.release(slot);
    }

    /// Hand `provider` to the fast path and start mixing it in `slot`
    ///
    /// Returns the attachment generation, or the provider back if the
    /// attachment queue is full.
    pub fn activate(
        &mut self,
        slot: usize,
        channels: usize,
        provider: Box<dyn BufferProvider>,
        track: Option<SharedTrack>,
    ) -> Result<u32, Box<dyn BufferProvider>> {
        let generation = self.pool.next_generation(slot);
        let attachment = FastAttachment {
            slot,
            generation,
            provider,
            track,
        };
        if let Err(rtrb::PushError::Full(attachment)) = self.attachments.push(attachment) {
            return Err(attachment.provider);
        }
        self.mutator.begin().activate(
            slot,
            FastTrackDesc {
                generation,
                channels: channels as u8,
            },
        );
        self.publish(PushMode::UntilPushed);
        Ok(generation)
    }

    /// Stop mixing `slot`; returns once the fast path has let go of it
    pub fn deactivate(&mut self, slot: usize) {
        self.mutator.begin().deactivate(slot);
        self.publish(PushMode::UntilAcked);
    }

    /// Attachments the fast path has retired since the last call
    pub fn drain_returns(&mut self, mut f: impl FnMut(FastAttachment)) {
        while let Ok(attachment) = self.returns.pop() {
            f(attachment);
        }
    }

    /// Publish the draft
    ///
    /// While cold idle the fast path is parked, so it is woken after the
    /// push to apply the draft; it parks again since the command is still
    /// cold idle. Waking strictly after pushing means a wake can never
    /// overtake the state it announces.
    fn publish(&mut self, mode: PushMode) {
        if !self.mutator.push(PushMode::UntilPushed) {
            log::error!("Fast path is gone; state not published");
            return;
        }
        if self.standby {
            self.gate.wake();
        }
        if mode == PushMode::UntilAcked {
            self.mutator.push(PushMode::UntilAcked);
        }
    }
}

impl OutputStrategy for FastPathOutput {
    fn name(&self) -> &'static str {
        "fast-path"
    }

    fn ready(&self) -> bool {
        self.pipe.fill() + self.frame_count <= self.setpoint.max(self.frame_count)
    }

    fn write(&mut self, mix: &[StereoSample]) -> usize {
        self.pipe.write(mix)
    }

    fn presented_frames(&self) -> u64 {
        self.pipe_shared.timestamp().frames
    }

    fn standby(&mut self) {
        if self.standby {
            return;
        }
        let state = self.mutator.begin();
        state.command = FastCommand::ColdIdle;
        state.cold_gen += 1;
        self.standby = true;
        if !self.mutator.push(PushMode::UntilPushed) {
            log::error!("Fast path is gone; standby not published");
        }
        log::debug!("Fast path entering cold idle");
    }

    fn exit_standby(&mut self) {
        if !self.standby {
            return;
        }
        self.mutator.begin().command = FastCommand::MixWrite;
        self.publish(PushMode::UntilPushed);
        self.standby = false;
        log::debug!("Fast path leaving cold idle");
    }

    fn fast_path(&mut self) -> Option<&mut FastPathOutput> {
        Some(self)
    }

    fn shutdown(&mut self) -> Option<Box<dyn OutputSink>> {
        let thread = self.thread.take()?;

        // Hot idle while every slot is retired in one edit, then cold idle;
        // each acknowledged before the next
        let state = self.mutator.begin();
        for slot in 0..MAX_FAST_TRACKS {
            state.deactivate(slot);
        }
        state.command = FastCommand::HotIdle;
        self.publish(PushMode::UntilAcked);

        let state = self.mutator.begin();
        state.command = FastCommand::ColdIdle;
        state.cold_gen += 1;
        self.standby = true;
        self.publish(PushMode::UntilAcked);

        self.mutator.begin().command = FastCommand::Exit;
        self.publish(PushMode::UntilAcked);

        match thread.join() {
            Ok(sink) => Some(sink),
            Err(_) => {
                log::error!("Fast path thread panicked");
                None
            }
        }
    }
}

impl Drop for FastPathOutput {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::VecProvider;
    use crate::sink::CaptureSink;
    use crate::types::SampleFormat;

    fn fast_output() -> FastPathOutput {
        let config = EngineConfig {
            frame_count: 480,
            fast_frame_count: 120,
            fast_path: true,
            ..EngineConfig::default()
        }
        .sanitized();
        let (mut sink, _capture) = CaptureSink::new(&[SampleFormat::F32]);
        let format = sink
            .negotiate(&[SinkFormat::new(SampleFormat::F32, config.sample_rate)])
            .unwrap();
        FastPathOutput::start(&config, Box::new(sink.paced()), format).unwrap()
    }

    #[test]
    fn test_shutdown_retires_every_slot_and_returns_sink() {
        let mut output = fast_output();
        let slot = output.lease_slot().unwrap();
        let provider = VecProvider::new(vec![0.0; 2 * 960], 2);
        assert!(output.activate(slot, 2, Box::new(provider), None).is_ok());
        output.exit_standby();

        assert!(output.shutdown().is_some());
        let mut returned = Vec::new();
        output.drain_returns(|attachment| returned.push(attachment.slot));
        returned.sort_unstable();
        assert_eq!(returned, vec![PIPE_SLOT, slot]);
        assert!(output.shutdown().is_none());
    }

    #[test]
    fn test_shutdown_from_standby() {
        let mut output = fast_output();
        assert!(output.shutdown().is_some());
    }
}
