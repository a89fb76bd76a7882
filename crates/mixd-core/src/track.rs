//! Client tracks
//!
//! A track is split in two halves:
//!
//! - [`TrackShared`]: atomics shared by the client, the control loop and
//!   the fast path. Volume is published here (the lock-free volume
//!   provider), progress counters and status flags flow back.
//! - [`TrackHandle`]: the client's end. It writes audio into the track's
//!   ring and sends lifecycle commands to the control loop.
//!
//! Every field the engine reads from `TrackShared` is client-writable, so
//! values are sanitized on the way in. Reads are `Relaxed`: a momentarily
//! stale volume only affects fade smoothness.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use basedrop::Shared;
use crossbeam::channel::Sender;

use crate::config::EngineConfig;
use crate::control::ControlCommand;
use crate::error::{MixerError, MixerResult};
use crate::gain::{sanitize_gain, StereoGain};
use crate::gc::gc_handle;
use crate::provider::TrackWriter;
use crate::types::TrackFormat;

/// Status flag: the engine gave up on the track after too many starved
/// cycles. The next client write restarts it.
pub const TRACK_DISABLED: u32 = 1 << 0;

/// Status flag: the track starved at least once since the client last
/// cleared it
pub const TRACK_UNDERRUN: u32 = 1 << 1;

/// Engine-wide track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Options chosen at track creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackOptions {
    /// Ask for a fast-path slot (granted only at the engine rate, and only
    /// while slots are free)
    pub fast: bool,
    /// Ring capacity in frames (0 = four normal periods)
    pub buffer_frames: usize,
    /// Effect session to route through, if any
    pub session: Option<u32>,
}

/// Presentation timestamp attributed to a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackTimestamp {
    /// Track frames that had been presented by the output
    pub frames: u64,
    /// Engine time of the measurement, nanoseconds since engine start
    pub time_ns: u64,
}

/// State shared between a client and the engine paths
#[derive(Debug)]
pub struct TrackShared {
    volume: AtomicU64,
    aux_level: AtomicU32,
    sample_rate: AtomicU32,
    flags: AtomicU32,
    frames_written: AtomicU64,
    frames_released: AtomicU64,
    underruns: AtomicU32,
    presented_frames: AtomicU64,
    presented_at_ns: AtomicU64,
    flush_requested: AtomicBool,
}

/// Shared track state, reclaimed off the real-time thread
pub type SharedTrack = Shared<TrackShared>;

impl TrackShared {
    pub fn new() -> Self {
        Self {
            volume: AtomicU64::new(StereoGain::UNITY.to_bits()),
            aux_level: AtomicU32::new(0f32.to_bits()),
            sample_rate: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            frames_written: AtomicU64::new(0),
            frames_released: AtomicU64::new(0),
            underruns: AtomicU32::new(0),
            presented_frames: AtomicU64::new(0),
            presented_at_ns: AtomicU64::new(0),
            flush_requested: AtomicBool::new(false),
        }
    }

    /// Allocate through the deferred collector
    pub fn new_shared() -> SharedTrack {
        Shared::new(&gc_handle(), Self::new())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Volume provider
    // ─────────────────────────────────────────────────────────────────────

    /// Current volume, clamped into [0, 1]
    #[inline]
    pub fn volume(&self) -> StereoGain {
        StereoGain::from_bits(self.volume.load(Ordering::Relaxed)).sanitized()
    }

    #[inline]
    pub fn set_volume(&self, gain: StereoGain) {
        self.volume.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Set volume from a packed U4.12 left/right word
    pub fn set_volume_u4_12(&self, packed: u32) {
        self.set_volume(StereoGain::from_packed_u4_12(packed));
    }

    #[inline]
    pub fn aux_level(&self) -> f32 {
        sanitize_gain(f32::from_bits(self.aux_level.load(Ordering::Relaxed)))
    }

    pub fn set_aux_level(&self, level: f32) {
        self.aux_level.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Requested playback rate (0 = the rate given at creation)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status flags
    // ─────────────────────────────────────────────────────────────────────

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn set_flags(&self, flags: u32) {
        self.flags.fetch_or(flags, Ordering::AcqRel);
    }

    /// Clear `flags`, returning which of them were set
    pub fn clear_flags(&self, flags: u32) -> u32 {
        self.flags.fetch_and(!flags, Ordering::AcqRel) & flags
    }

    pub fn is_disabled(&self) -> bool {
        self.flags() & TRACK_DISABLED != 0
    }

    // ─────────────────────────────────────────────────────────────────────
    // Progress counters
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_frames_written(&self, frames: usize) {
        self.frames_written.fetch_add(frames as u64, Ordering::Release);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }

    pub fn add_frames_released(&self, frames: usize) {
        self.frames_released.fetch_add(frames as u64, Ordering::Release);
    }

    pub fn frames_released(&self) -> u64 {
        self.frames_released.load(Ordering::Acquire)
    }

    /// Count one starved cycle (monotonic, never reset)
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.set_flags(TRACK_UNDERRUN);
    }

    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Attribute an output timestamp to this track
    pub fn set_timestamp(&self, timestamp: TrackTimestamp) {
        self.presented_frames.store(timestamp.frames, Ordering::Relaxed);
        self.presented_at_ns.store(timestamp.time_ns, Ordering::Release);
    }

    pub fn timestamp(&self) -> TrackTimestamp {
        let time_ns = self.presented_at_ns.load(Ordering::Acquire);
        TrackTimestamp {
            frames: self.presented_frames.load(Ordering::Relaxed),
            time_ns,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Flush
    // ─────────────────────────────────────────────────────────────────────

    /// Ask whichever path owns the track source to discard buffered data
    pub fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_requested.load(Ordering::Acquire)
    }

    pub fn take_flush_request(&self) -> bool {
        self.flush_requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for TrackShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject formats and rates the track path cannot carry
pub fn validate_track_format(format: &TrackFormat, config: &EngineConfig) -> MixerResult<()> {
    if !format.channel_mask.is_valid() {
        return Err(MixerError::unsupported_mask(format.channel_mask));
    }
    let max_rate = config.sample_rate as f64 * config.max_resample_ratio;
    if format.sample_rate == 0 || format.sample_rate as f64 > max_rate {
        return Err(MixerError::InvalidSampleRate {
            rate: format.sample_rate,
            engine_rate: config.sample_rate,
        });
    }
    Ok(())
}

/// Snapshot of a track's client-visible status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStatus {
    pub flags: u32,
    pub underruns: u32,
    pub frames_written: u64,
    pub frames_released: u64,
    pub timestamp: TrackTimestamp,
}

/// Client end of a track
///
/// Dropping the handle destroys the track.
pub struct TrackHandle {
    id: TrackId,
    format: TrackFormat,
    fast: bool,
    writer: TrackWriter,
    shared: SharedTrack,
    commands: Sender<ControlCommand>,
}

impl TrackHandle {
    pub(crate) fn new(
        id: TrackId,
        format: TrackFormat,
        fast: bool,
        writer: TrackWriter,
        shared: SharedTrack,
        commands: Sender<ControlCommand>,
    ) -> Self {
        Self {
            id,
            format,
            fast,
            writer,
            shared,
            commands,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn format(&self) -> TrackFormat {
        self.format
    }

    /// Whether the track was granted a fast-path slot
    pub fn is_fast(&self) -> bool {
        self.fast
    }

    /// Write interleaved frames in the track's format
    ///
    /// Returns frames accepted; only whole frames are taken. If the engine
    /// disabled the track after it starved, this write restarts it.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let written = self.writer.write(data);
        if self.shared.clear_flags(TRACK_DISABLED) != 0 {
            log::debug!("{} restarted by client write", self.id);
            let _ = self.commands.send(ControlCommand::Start(self.id));
        }
        written
    }

    /// Write float samples (the track must be `f32`)
    pub fn write_samples(&mut self, samples: &[f32]) -> MixerResult<usize> {
        if self.format.sample_format != crate::types::SampleFormat::F32 {
            return Err(MixerError::UnsupportedFormat(self.format.sample_format));
        }
        Ok(self.write(bytemuck::cast_slice(samples)))
    }

    /// Frames that can be written without overflowing the ring
    pub fn frames_writable(&self) -> usize {
        self.writer.frames_writable()
    }

    pub fn start(&self) -> MixerResult<()> {
        self.send(ControlCommand::Start(self.id))
    }

    pub fn stop(&self) -> MixerResult<()> {
        self.send(ControlCommand::Stop(self.id))
    }

    pub fn pause(&self) -> MixerResult<()> {
        self.send(ControlCommand::Pause(self.id))
    }

    pub fn flush(&self) -> MixerResult<()> {
        self.send(ControlCommand::Flush(self.id))
    }

    pub fn set_volume(&self, left: f32, right: f32) {
        self.shared.set_volume(StereoGain::new(left, right));
    }

    /// Legacy fixed-point volume, packed left/right U4.12
    pub fn set_volume_u4_12(&self, packed: u32) {
        self.shared.set_volume_u4_12(packed);
    }

    pub fn set_aux_level(&self, level: f32) {
        self.shared.set_aux_level(level);
    }

    /// Change the playback rate (normal tracks only)
    pub fn set_sample_rate(&self, rate: u32) -> MixerResult<()> {
        if self.fast && rate != self.format.sample_rate {
            return Err(MixerError::InvalidSampleRate {
                rate,
                engine_rate: self.format.sample_rate,
            });
        }
        if rate == 0 {
            return Err(MixerError::InvalidSampleRate {
                rate,
                engine_rate: self.format.sample_rate,
            });
        }
        self.shared.set_sample_rate(rate);
        Ok(())
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            flags: self.shared.flags(),
            underruns: self.shared.underruns(),
            frames_written: self.shared.frames_written(),
            frames_released: self.shared.frames_released(),
            timestamp: self.shared.timestamp(),
        }
    }

    /// Clear the underrun flag, returning whether it was set
    pub fn take_underrun(&self) -> bool {
        self.shared.clear_flags(TRACK_UNDERRUN) != 0
    }

    fn send(&self, command: ControlCommand) -> MixerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| MixerError::EngineShutDown)
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(ControlCommand::Destroy(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelMask, SampleFormat};

    #[test]
    fn test_volume_is_sanitized_on_read() {
        let shared = TrackShared::new();
        shared.set_volume(StereoGain::new(7.0, f32::NAN));
        assert_eq!(shared.volume(), StereoGain::new(1.0, 0.0));

        shared.set_volume_u4_12(crate::gain::pack_lr_u4_12(0x0800, 0x1000));
        assert_eq!(shared.volume(), StereoGain::new(0.5, 1.0));
    }

    #[test]
    fn test_flags() {
        let shared = TrackShared::new();
        shared.record_underrun();
        shared.set_flags(TRACK_DISABLED);
        assert!(shared.is_disabled());
        assert_eq!(shared.clear_flags(TRACK_DISABLED), TRACK_DISABLED);
        assert_eq!(shared.clear_flags(TRACK_DISABLED), 0);
        assert_eq!(shared.flags(), TRACK_UNDERRUN);
        assert_eq!(shared.underruns(), 1);
    }

    #[test]
    fn test_flush_request_is_taken_once() {
        let shared = TrackShared::new();
        shared.request_flush();
        assert!(shared.flush_pending());
        assert!(shared.take_flush_request());
        assert!(!shared.take_flush_request());
    }

    #[test]
    fn test_validate_track_format() {
        let config = EngineConfig::default();
        let ok = TrackFormat::new(SampleFormat::I16, ChannelMask::SURROUND_5_1, 44100);
        assert!(validate_track_format(&ok, &config).is_ok());

        let bad_mask = TrackFormat::new(SampleFormat::I16, ChannelMask(1 << 30), 48000);
        assert_eq!(
            validate_track_format(&bad_mask, &config),
            Err(MixerError::UnsupportedChannelMask(1 << 30))
        );

        let too_fast = TrackFormat::new(SampleFormat::F32, ChannelMask::STEREO, 192_000);
        assert!(matches!(
            validate_track_format(&too_fast, &config),
            Err(MixerError::InvalidSampleRate { rate: 192_000, .. })
        ));
    }
}
