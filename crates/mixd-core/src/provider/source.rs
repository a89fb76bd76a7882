//! Client ring: the bottom of every track chain
//!
//! The client writes raw interleaved bytes into a lock-free SPSC ring
//! (`rtrb`); the engine end copies whole frames out into an aligned staging
//! buffer and lends them downstream. Neither side ever blocks or allocates.

use rtrb::{Consumer, Producer, RingBuffer};

use super::{BufferProvider, ProvidedBuffer};
use crate::track::SharedTrack;
use crate::types::TrackFormat;

/// Create the ring for a track holding `capacity_frames` frames
pub fn track_ring(
    format: TrackFormat,
    capacity_frames: usize,
    shared: SharedTrack,
) -> (TrackWriter, TrackSource) {
    let frame_size = format.frame_size();
    let capacity_frames = capacity_frames.max(1);
    let (producer, consumer) = RingBuffer::<u8>::new(capacity_frames * frame_size);

    // u32 backing keeps staged f32 data aligned for the mixer
    let staging_words = (capacity_frames * frame_size).div_ceil(4);

    let writer = TrackWriter {
        producer,
        frame_size,
        shared: shared.clone(),
    };
    let source = TrackSource {
        consumer,
        frame_size,
        staging: vec![0u32; staging_words],
        staged: 0,
        offset: 0,
        shared,
    };
    (writer, source)
}

/// Client side of a track ring
pub struct TrackWriter {
    producer: Producer<u8>,
    frame_size: usize,
    shared: SharedTrack,
}

impl TrackWriter {
    /// Copy as many whole frames of `data` as fit; returns frames written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let frames = (data.len() / self.frame_size).min(self.frames_writable());
        if frames == 0 {
            return 0;
        }
        let bytes = frames * self.frame_size;
        let Ok(mut chunk) = self.producer.write_chunk(bytes) else {
            return 0;
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&data[..split]);
        second.copy_from_slice(&data[split..bytes]);
        chunk.commit_all();

        self.shared.add_frames_written(frames);
        frames
    }

    pub fn frames_writable(&self) -> usize {
        self.producer.slots() / self.frame_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Engine side of a track ring, the bottom stage of a chain
pub struct TrackSource {
    consumer: Consumer<u8>,
    frame_size: usize,
    staging: Vec<u32>,
    /// Bytes held in staging
    staged: usize,
    /// Staged bytes already released
    offset: usize,
    shared: SharedTrack,
}

impl TrackSource {
    pub fn shared(&self) -> &SharedTrack {
        &self.shared
    }

    fn staging_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.staging)
    }

    fn lend(&self, frames: usize) -> ProvidedBuffer<'_> {
        let frames = frames.min((self.staged - self.offset) / self.frame_size);
        let end = self.offset + frames * self.frame_size;
        ProvidedBuffer {
            data: &self.staging_bytes()[self.offset..end],
            frames,
        }
    }

    fn discard(&mut self) {
        self.staged = 0;
        self.offset = 0;
        let pending = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(pending) {
            chunk.commit_all();
        }
    }
}

impl BufferProvider for TrackSource {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn get_next_buffer(&mut self, frames: usize) -> ProvidedBuffer<'_> {
        if self.shared.take_flush_request() {
            self.discard();
        }
        if frames == 0 {
            return ProvidedBuffer::EMPTY;
        }
        if self.offset < self.staged {
            return self.lend(frames);
        }

        let capacity_frames = self.staging.len() * 4 / self.frame_size;
        let available = self.consumer.slots() / self.frame_size;
        let take = frames.min(available).min(capacity_frames);
        if take == 0 {
            return ProvidedBuffer::EMPTY;
        }

        let bytes = take * self.frame_size;
        let Ok(chunk) = self.consumer.read_chunk(bytes) else {
            return ProvidedBuffer::EMPTY;
        };
        let staging: &mut [u8] = bytemuck::cast_slice_mut(&mut self.staging);
        let (first, second) = chunk.as_slices();
        staging[..first.len()].copy_from_slice(first);
        staging[first.len()..bytes].copy_from_slice(second);
        chunk.commit_all();

        self.staged = bytes;
        self.offset = 0;
        self.lend(frames)
    }

    fn release_buffer(&mut self, frames: usize) {
        let bytes = (frames * self.frame_size).min(self.staged - self.offset);
        self.offset += bytes;
        self.shared.add_frames_released(bytes / self.frame_size);
        if self.offset == self.staged {
            self.staged = 0;
            self.offset = 0;
        }
    }

    fn frames_ready(&self) -> usize {
        if self.shared.flush_pending() {
            return 0;
        }
        (self.staged - self.offset) / self.frame_size + self.consumer.slots() / self.frame_size
    }

    fn reset(&mut self) {
        self.shared.take_flush_request();
        self.discard();
    }
}
