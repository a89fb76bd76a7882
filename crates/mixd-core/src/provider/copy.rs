//! Shared buffering for stages that produce into a private buffer

use super::{BufferProvider, ProvidedBuffer};
use crate::types::Sample;

/// Per-buffer conversion performed by a [`CopyStage`]
pub trait CopyTransform: Send {
    /// Float samples per output frame
    fn output_channels(&self) -> usize;

    /// Convert `frames` upstream frames from `src` into `dst`
    ///
    /// `dst` holds exactly `frames * output_channels()` samples. Returns
    /// false if `src` could not be read; the stage then outputs silence.
    fn transform(&mut self, src: &[u8], frames: usize, dst: &mut [Sample]) -> bool;
}

/// Provider stage that converts upstream buffers into a private copy
///
/// An upstream buffer is converted in full as soon as it is obtained. The
/// converted frames are then lent out, possibly across several partial
/// releases, before the next upstream request. Upstream frames are released
/// only as their converted copies are, so release counts below this stage
/// never run ahead of what was actually consumed.
pub struct CopyStage<T: CopyTransform> {
    upstream: Box<dyn BufferProvider>,
    transform: T,
    buffer: Vec<Sample>,
    max_frames: usize,
    /// Frames held in `buffer`
    frames: usize,
    /// Frames of `buffer` already released downstream
    offset: usize,
    silenced: u64,
}

impl<T: CopyTransform> CopyStage<T> {
    /// Build a stage converting at most `max_frames` frames per upstream pull
    ///
    /// The private buffer is allocated here, never while mixing.
    pub fn new(upstream: Box<dyn BufferProvider>, transform: T, max_frames: usize) -> Self {
        let max_frames = max_frames.max(1);
        let buffer = vec![0.0; max_frames * transform.output_channels()];
        Self {
            upstream,
            transform,
            buffer,
            max_frames,
            frames: 0,
            offset: 0,
            silenced: 0,
        }
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    /// Unwrap the stage, returning the provider beneath it
    ///
    /// Frames converted but not yet released stay buffered upstream.
    pub fn into_upstream(self) -> Box<dyn BufferProvider> {
        self.upstream
    }

    fn lend(&self, frames: usize) -> ProvidedBuffer<'_> {
        let channels = self.transform.output_channels();
        let frames = frames.min(self.frames - self.offset);
        let start = self.offset * channels;
        let end = start + frames * channels;
        ProvidedBuffer {
            data: bytemuck::cast_slice(&self.buffer[start..end]),
            frames,
        }
    }
}

impl<T: CopyTransform> BufferProvider for CopyStage<T> {
    fn frame_size(&self) -> usize {
        self.transform.output_channels() * std::mem::size_of::<Sample>()
    }

    fn get_next_buffer(&mut self, frames: usize) -> ProvidedBuffer<'_> {
        if frames == 0 {
            return ProvidedBuffer::EMPTY;
        }
        if self.offset < self.frames {
            return self.lend(frames);
        }

        let channels = self.transform.output_channels();
        let upstream = self.upstream.get_next_buffer(frames.min(self.max_frames));
        let got = upstream.frames;
        if got == 0 {
            return ProvidedBuffer::EMPTY;
        }

        let dst = &mut self.buffer[..got * channels];
        if !self.transform.transform(upstream.data, got, dst) {
            dst.fill(0.0);
            self.silenced += got as u64;
        }

        self.frames = got;
        self.offset = 0;
        self.lend(frames)
    }

    fn release_buffer(&mut self, frames: usize) {
        let frames = frames.min(self.frames - self.offset);
        self.upstream.release_buffer(frames);
        self.offset += frames;
        if self.offset == self.frames {
            self.offset = 0;
            self.frames = 0;
        }
    }

    /// Lent frames are still unreleased upstream, so upstream counts them
    fn frames_ready(&self) -> usize {
        self.upstream.frames_ready()
    }

    fn reset(&mut self) {
        self.frames = 0;
        self.offset = 0;
        self.upstream.reset();
    }

    fn silenced_frames(&self) -> u64 {
        self.silenced + self.upstream.silenced_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{track_ring, Reformatter, VecProvider};
    use crate::track::TrackShared;
    use crate::types::{ChannelMask, SampleFormat, TrackFormat};

    /// Doubles every sample; fails on request
    struct Doubler {
        fail: bool,
    }

    impl CopyTransform for Doubler {
        fn output_channels(&self) -> usize {
            1
        }

        fn transform(&mut self, src: &[u8], frames: usize, dst: &mut [Sample]) -> bool {
            if self.fail {
                return false;
            }
            let src: &[Sample] = bytemuck::cast_slice(src);
            for (out, sample) in dst.iter_mut().zip(&src[..frames]) {
                *out = sample * 2.0;
            }
            true
        }
    }

    #[test]
    fn test_partial_release_lends_remainder() {
        let upstream = VecProvider::new(vec![1.0, 2.0, 3.0, 4.0], 1);
        let mut stage = CopyStage::new(Box::new(upstream), Doubler { fail: false }, 16);

        let buffer = stage.get_next_buffer(4);
        assert_eq!(buffer.samples(), Some(&[2.0f32, 4.0, 6.0, 8.0][..]));
        stage.release_buffer(1);
        assert_eq!(stage.frames_ready(), 3);

        let buffer = stage.get_next_buffer(2);
        assert_eq!(buffer.samples(), Some(&[4.0f32, 6.0][..]));
        stage.release_buffer(2);

        let buffer = stage.get_next_buffer(8);
        assert_eq!(buffer.samples(), Some(&[8.0f32][..]));
        stage.release_buffer(1);
        assert_eq!(stage.frames_ready(), 0);
        assert!(stage.get_next_buffer(8).is_empty());
    }

    #[test]
    fn test_upstream_released_with_downstream() {
        let format = TrackFormat::new(SampleFormat::I16, ChannelMask::STEREO, 48000);
        let shared = TrackShared::new_shared();
        let (mut writer, source) = track_ring(format, 64, shared.clone());
        let bytes: Vec<u8> = std::iter::repeat(8192i16)
            .take(8 * 2)
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        assert_eq!(writer.write(&bytes), 8);

        let mut stage = Reformatter::for_format(Box::new(source), SampleFormat::I16, 2, 16);
        assert_eq!(stage.get_next_buffer(8).frames, 8);
        assert_eq!(shared.frames_released(), 0);
        assert_eq!(stage.frames_ready(), 8);

        stage.release_buffer(3);
        assert_eq!(shared.frames_released(), 3);
        assert_eq!(stage.frames_ready(), 5);

        assert_eq!(stage.get_next_buffer(8).frames, 5);
        stage.release_buffer(8);
        assert_eq!(shared.frames_released(), 8);
        assert_eq!(stage.frames_ready(), 0);
    }

    #[test]
    fn test_pull_is_bounded_by_private_buffer() {
        let upstream = VecProvider::new(vec![0.5; 10], 1);
        let mut stage = CopyStage::new(Box::new(upstream), Doubler { fail: false }, 4);
        assert_eq!(stage.get_next_buffer(10).frames, 4);
    }

    #[test]
    fn test_failed_transform_yields_silence() {
        let upstream = VecProvider::new(vec![0.5; 3], 1);
        let mut stage = CopyStage::new(Box::new(upstream), Doubler { fail: true }, 8);

        let buffer = stage.get_next_buffer(3);
        assert_eq!(buffer.samples(), Some(&[0.0f32; 3][..]));
        stage.release_buffer(3);
        assert_eq!(stage.silenced_frames(), 3);
    }
}
