//! Buffer-provider chain
//!
//! Each track reaches the mixer through a pull-based chain of providers.
//! The chain head yields frames in the mixer's working shape (float, one or
//! two channels); stages below it adapt whatever the client writes:
//!
//! ```text
//! TrackSource (client ring, raw bytes)
//!     └── Reformatter (u8/i16/i32 -> f32)          only if not already f32
//!         └── Downmixer (N channels -> stereo)     only if wider than stereo
//!             └── chain head, handed to the mixer
//! ```
//!
//! Every stage owns the stage beneath it. Rate conversion is not a stage:
//! the mixer's resampler pulls from the chain head so that it runs at unity
//! gain and the mixer applies volume and aux send afterwards.
//!
//! # Contract
//!
//! `get_next_buffer(n)` returns at most `n` frames; zero frames means "no
//! data now" and is never an error. The caller must `release_buffer(k)` with
//! `k` no larger than what it was given before asking again.

mod chain;
mod copy;
mod downmix;
mod pipe;
mod reformat;
mod source;

pub use chain::{build_chain, ChainSpec};
pub use copy::{CopyStage, CopyTransform};
pub use downmix::{ChannelMix, DownmixAlgorithm, Downmixer};
pub use pipe::{pipe, PipeSource, PipeWriter};
pub use reformat::Reformatter;
pub use source::{track_ring, TrackSource, TrackWriter};

use crate::types::{Sample, StereoSample};

/// A span of frames lent out by a provider
///
/// `data` holds `frames * frame_size()` bytes of interleaved samples.
#[derive(Debug, Clone, Copy)]
pub struct ProvidedBuffer<'a> {
    pub data: &'a [u8],
    pub frames: usize,
}

impl<'a> ProvidedBuffer<'a> {
    /// The "no data now" result
    pub const EMPTY: ProvidedBuffer<'static> = ProvidedBuffer { data: &[], frames: 0 };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// View as float samples, if the bytes are suitably aligned
    ///
    /// Misalignment can only come from a broken provider; callers substitute
    /// silence and record a diagnostic instead of failing.
    #[inline]
    pub fn samples(&self) -> Option<&'a [Sample]> {
        bytemuck::try_cast_slice(self.data).ok()
    }
}

/// Pull-based source of audio frames
pub trait BufferProvider: Send {
    /// Bytes per frame of the data this provider yields
    fn frame_size(&self) -> usize;

    /// Borrow up to `frames` frames
    fn get_next_buffer(&mut self, frames: usize) -> ProvidedBuffer<'_>;

    /// Return `frames` frames of the last buffer as consumed
    fn release_buffer(&mut self, frames: usize);

    /// Frames available without blocking
    fn frames_ready(&self) -> usize;

    /// Discard buffered data (stage state and everything upstream)
    fn reset(&mut self) {}

    /// Frames replaced by silence because of a broken upstream buffer
    fn silenced_frames(&self) -> u64 {
        0
    }
}

/// Read frame `index` of an interleaved mono or stereo float slice
#[inline]
pub fn frame_at(samples: &[Sample], channels: usize, index: usize) -> StereoSample {
    if channels == 1 {
        StereoSample::mono(samples[index])
    } else {
        let base = index * channels;
        StereoSample::new(samples[base], samples[base + 1])
    }
}

/// In-memory provider yielding interleaved float frames
///
/// Used for prerolled data and in tests. Can be told to hand out no more
/// than `max_chunk` frames per request to exercise partial buffers.
#[derive(Debug, Clone)]
pub struct VecProvider {
    samples: Vec<Sample>,
    channels: usize,
    position: usize,
    max_chunk: usize,
    released: usize,
}

impl VecProvider {
    pub fn new(samples: Vec<Sample>, channels: usize) -> Self {
        Self {
            samples,
            channels,
            position: 0,
            max_chunk: usize::MAX,
            released: 0,
        }
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Total frames released so far
    pub fn frames_released(&self) -> usize {
        self.released
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl BufferProvider for VecProvider {
    fn frame_size(&self) -> usize {
        self.channels * std::mem::size_of::<Sample>()
    }

    fn get_next_buffer(&mut self, frames: usize) -> ProvidedBuffer<'_> {
        let frames = frames.min(self.max_chunk).min(self.frames_ready());
        let start = self.position * self.channels;
        let end = start + frames * self.channels;
        ProvidedBuffer {
            data: bytemuck::cast_slice(&self.samples[start..end]),
            frames,
        }
    }

    fn release_buffer(&mut self, frames: usize) {
        let frames = frames.min(self.frames_ready());
        self.position += frames;
        self.released += frames;
    }

    fn frames_ready(&self) -> usize {
        self.total_frames() - self.position
    }

    fn reset(&mut self) {
        self.position = self.total_frames();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_provider_partial_release() {
        let mut provider = VecProvider::new(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5], 2);
        let buffer = provider.get_next_buffer(8);
        assert_eq!(buffer.frames, 3);
        provider.release_buffer(1);
        assert_eq!(provider.frames_ready(), 2);

        let buffer = provider.get_next_buffer(1);
        assert_eq!(buffer.samples(), Some(&[0.2f32, 0.3][..]));
    }

    #[test]
    fn test_misaligned_buffer_has_no_sample_view() {
        let backing = [0u32; 4];
        let bytes: &[u8] = bytemuck::cast_slice(&backing);
        let buffer = ProvidedBuffer {
            data: &bytes[1..9],
            frames: 1,
        };
        assert!(buffer.samples().is_none());
    }

    #[test]
    fn test_frame_at_expands_mono() {
        let samples = [0.25, 0.5];
        assert_eq!(frame_at(&samples, 1, 1), StereoSample::mono(0.5));
        assert_eq!(frame_at(&samples, 2, 0), StereoSample::new(0.25, 0.5));
    }
}
