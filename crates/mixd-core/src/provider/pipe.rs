//! Normal-path to fast-path pipe
//!
//! When the fast path owns the sink, the control loop's mix is written into
//! this lock-free stereo ring and mixed by the fast path like any other
//! track, from the reserved fast slot 0. Its progress counters live in a
//! [`TrackShared`](crate::track::TrackShared) so the fast path attributes
//! presentation timestamps to the normal mix the same way it does for
//! fast tracks.

use rtrb::{Consumer, Producer, RingBuffer};

use super::{BufferProvider, ProvidedBuffer};
use crate::track::SharedTrack;
use crate::types::StereoSample;

/// Create a pipe holding up to `capacity` frames; the reader stages at most
/// `max_read` frames per request
pub fn pipe(capacity: usize, max_read: usize, shared: SharedTrack) -> (PipeWriter, PipeSource) {
    let (producer, consumer) = RingBuffer::<StereoSample>::new(capacity.max(1));
    (
        PipeWriter {
            producer,
            shared: shared.clone(),
        },
        PipeSource {
            consumer,
            staging: vec![StereoSample::silence(); max_read.max(1)],
            staged: 0,
            offset: 0,
            shared,
        },
    )
}

/// Write end, owned by the control loop
pub struct PipeWriter {
    producer: Producer<StereoSample>,
    shared: SharedTrack,
}

impl PipeWriter {
    /// Write as many frames as fit; returns frames written
    pub fn write(&mut self, frames: &[StereoSample]) -> usize {
        let count = frames.len().min(self.producer.slots());
        if count == 0 {
            return 0;
        }
        let Ok(mut chunk) = self.producer.write_chunk(count) else {
            return 0;
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&frames[..split]);
        second.copy_from_slice(&frames[split..count]);
        chunk.commit_all();
        self.shared.add_frames_written(count);
        count
    }

    /// Frames currently buffered
    pub fn fill(&self) -> usize {
        self.capacity() - self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// True once the fast path has dropped its end
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }

    pub fn shared(&self) -> &SharedTrack {
        &self.shared
    }
}

/// Read end, a buffer provider mixed by the fast path
pub struct PipeSource {
    consumer: Consumer<StereoSample>,
    staging: Vec<StereoSample>,
    staged: usize,
    offset: usize,
    shared: SharedTrack,
}

impl BufferProvider for PipeSource {
    fn frame_size(&self) -> usize {
        std::mem::size_of::<StereoSample>()
    }

    fn get_next_buffer(&mut self, frames: usize) -> ProvidedBuffer<'_> {
        if self.offset == self.staged {
            let take = frames.min(self.consumer.slots()).min(self.staging.len());
            if take == 0 {
                return ProvidedBuffer::EMPTY;
            }
            let Ok(chunk) = self.consumer.read_chunk(take) else {
                return ProvidedBuffer::EMPTY;
            };
            let (first, second) = chunk.as_slices();
            self.staging[..first.len()].copy_from_slice(first);
            self.staging[first.len()..take].copy_from_slice(second);
            chunk.commit_all();
            self.staged = take;
            self.offset = 0;
        }

        let frames = frames.min(self.staged - self.offset);
        let lent = &self.staging[self.offset..self.offset + frames];
        ProvidedBuffer {
            data: bytemuck::cast_slice(lent),
            frames,
        }
    }

    fn release_buffer(&mut self, frames: usize) {
        let frames = frames.min(self.staged - self.offset);
        self.shared.add_frames_released(frames);
        self.offset += frames;
        if self.offset == self.staged {
            self.offset = 0;
            self.staged = 0;
        }
    }

    fn frames_ready(&self) -> usize {
        (self.staged - self.offset) + self.consumer.slots()
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.staged = 0;
        let pending = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(pending) {
            chunk.commit_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackShared;

    #[test]
    fn test_pipe_round_trip() {
        let (mut writer, mut source) = pipe(8, 4, TrackShared::new_shared());
        let frames = [
            StereoSample::new(0.1, 0.2),
            StereoSample::new(0.3, 0.4),
            StereoSample::new(0.5, 0.6),
        ];
        assert_eq!(writer.write(&frames), 3);
        assert_eq!(writer.fill(), 3);
        assert_eq!(source.frames_ready(), 3);

        let buffer = source.get_next_buffer(2);
        assert_eq!(buffer.samples(), Some(&[0.1f32, 0.2, 0.3, 0.4][..]));
        source.release_buffer(2);
        assert_eq!(writer.fill(), 1);
        assert_eq!(source.frames_ready(), 1);
        assert_eq!(writer.shared().frames_written(), 3);
        assert_eq!(writer.shared().frames_released(), 2);
    }

    #[test]
    fn test_pipe_write_is_bounded_by_capacity() {
        let (mut writer, _source) = pipe(4, 4, TrackShared::new_shared());
        assert_eq!(writer.write(&[StereoSample::mono(1.0); 6]), 4);
        assert_eq!(writer.write(&[StereoSample::mono(1.0); 6]), 0);
    }
}
