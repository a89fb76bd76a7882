//! Output sinks
//!
//! A sink is where the final mix goes. The engine negotiates one format up
//! front and then writes whole periods, accepting partial writes. Sinks
//! report a presentation timestamp so the fast path can tell each track how
//! much of its audio has actually been heard.
//!
//! - [`NullSink`]: discards audio, optionally paced in real time
//! - [`CaptureSink`]: keeps everything it is given (tests, offline renders)
//! - `CpalSink`: device output, behind the `cpal-sink` feature

mod capture;
#[cfg(feature = "cpal-sink")]
mod device;
mod null;

pub use capture::{CaptureHandle, CaptureSink};
#[cfg(feature = "cpal-sink")]
pub use device::CpalSink;
pub use null::NullSink;

use std::time::Instant;

use crate::convert::from_float;
use crate::error::SinkResult;
use crate::types::{SampleFormat, StereoSample, MIXER_CHANNELS};

/// A format a sink may be opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: usize,
}

impl SinkFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            sample_format,
            sample_rate,
            channels: MIXER_CHANNELS,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels
    }
}

/// Frames the output has presented, and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkTimestamp {
    /// Frames that have left the output since it was opened
    pub position: u64,
    pub time: Instant,
}

/// Destination of the final mix
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    /// Pick the first acceptable format from `candidates` (in preference
    /// order) and configure for it
    fn negotiate(&mut self, candidates: &[SinkFormat]) -> SinkResult<SinkFormat>;

    /// Write interleaved frames in the negotiated format
    ///
    /// Returns frames accepted, which may be fewer than `frames`.
    fn write(&mut self, data: &[u8], frames: usize) -> SinkResult<usize>;

    /// Presentation position, if the sink can report one
    fn timestamp(&self) -> Option<SinkTimestamp>;

    /// Frames written but not yet presented
    fn latency_frames(&self) -> u64 {
        0
    }

    /// Release the device while the engine is idle
    fn standby(&mut self) {}
}

/// Converts the float mix into the negotiated sink format
///
/// Samples are clamped to full scale on the way out; this is the only
/// place the mix is clamped.
pub struct OutputConverter {
    format: SinkFormat,
    bytes: Vec<u8>,
}

impl OutputConverter {
    /// Buffer sized for `max_frames` frames
    pub fn new(format: SinkFormat, max_frames: usize) -> Self {
        Self {
            format,
            bytes: vec![0; max_frames * format.frame_size()],
        }
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }

    /// Convert `frames`, returning the bytes to write
    pub fn convert(&mut self, frames: &[StereoSample]) -> &[u8] {
        let frames = &frames[..frames.len().min(self.bytes.len() / self.format.frame_size())];
        let samples: &[f32] = bytemuck::cast_slice(frames);
        let len = frames.len() * self.format.frame_size();
        from_float(self.format.sample_format, samples, &mut self.bytes[..len]);
        &self.bytes[..len]
    }
}

/// Blocks writes so frames leave no faster than real time
#[derive(Debug, Default)]
pub(crate) struct Pacer {
    /// Wall-clock origin of frame 0
    origin: Option<Instant>,
}

impl Pacer {
    /// Sleep until `written` frames at `rate` are due
    pub fn wait(&mut self, written: u64, rate: u32) {
        let now = Instant::now();
        let due = duration_of(written, rate);
        let origin = *self
            .origin
            .get_or_insert_with(|| now.checked_sub(due).unwrap_or(now));
        let deadline = origin + due;
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }

    /// Frames of `written` the clock has caught up with
    pub fn presented(&self, written: u64, rate: u32, now: Instant) -> u64 {
        match self.origin {
            Some(origin) => {
                let elapsed = now.saturating_duration_since(origin);
                ((elapsed.as_secs_f64() * rate as f64) as u64).min(written)
            }
            None => written,
        }
    }

    /// Restart the clock at the next write
    pub fn reset(&mut self) {
        self.origin = None;
    }
}

fn duration_of(frames: u64, rate: u32) -> std::time::Duration {
    std::time::Duration::from_nanos(frames.saturating_mul(1_000_000_000) / rate.max(1) as u64)
}

/// Pick the first of `candidates` whose sample format is in `supported`
pub(crate) fn first_supported(
    candidates: &[SinkFormat],
    supported: &[SampleFormat],
) -> Option<SinkFormat> {
    candidates
        .iter()
        .copied()
        .find(|candidate| {
            candidate.channels == MIXER_CHANNELS && supported.contains(&candidate.sample_format)
        })
}
