//! Common types for the mixing engine
//!
//! This module contains the fundamental audio types used throughout mixd:
//! the internal stereo frame and buffer types the mixer produces, and the
//! descriptions of client track formats (sample container and channel
//! layout) that the buffer-provider chain adapts from.

use serde::{Deserialize, Serialize};

/// Default engine sample rate (48kHz - standard professional audio rate)
pub const SAMPLE_RATE: u32 = 48000;

/// Number of channels the mixer works in internally (always stereo)
pub const MIXER_CHANNELS: usize = 2;

/// Maximum number of channels a client track may carry (7.1)
pub const MAX_TRACK_CHANNELS: usize = 8;

/// Internal sample type (32-bit float, nominal range [-1.0, 1.0])
pub type Sample = f32;

/// One frame of the internal mix, `[left, right]` in memory
///
/// Pod, so a `&[StereoSample]` can be viewed as interleaved floats or raw
/// bytes without copying.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Same value on both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self::new(value, value)
    }

    /// Larger of the two magnitudes
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

/// Preallocated stereo mix buffer
///
/// Mix, effect-session and fast-path output buffers are allocated once at
/// their largest size; the real-time paths only move the working length.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    frames: Vec<StereoSample>,
}

impl StereoBuffer {
    pub fn silence(len: usize) -> Self {
        Self {
            frames: vec![StereoSample::silence(); len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Move the working length within the allocated capacity
    ///
    /// Frames exposed by growing are silent. Growing past the capacity
    /// would allocate.
    #[inline]
    pub fn set_len_from_capacity(&mut self, len: usize) {
        debug_assert!(len <= self.frames.capacity(), "buffer grown past its allocation");
        self.frames.resize(len, StereoSample::silence());
    }

    pub fn fill_silence(&mut self) {
        self.frames.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.frames
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.frames
    }

    /// Sum `other` into this buffer, frame by frame
    pub fn add_buffer(&mut self, other: &StereoBuffer) {
        for (dst, &src) in self.frames.iter_mut().zip(&other.frames) {
            *dst += src;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.frames.iter()
    }

    pub fn peak(&self) -> Sample {
        self.frames.iter().map(StereoSample::peak).fold(0.0, Sample::max)
    }
}

impl std::ops::Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &StereoSample {
        &self.frames[index]
    }
}

/// Sample container representation of a client track or a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 8-bit, offset binary (128 = silence)
    U8,
    /// Signed 16-bit
    I16,
    /// Signed 32-bit, Q0.31
    I32,
    /// 32-bit float, nominal range [-1.0, 1.0]
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }

    /// Required alignment of a buffer holding this format
    #[inline]
    pub fn alignment(&self) -> usize {
        self.bytes_per_sample()
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::I16 => "i16",
            SampleFormat::I32 => "i32",
            SampleFormat::F32 => "f32",
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Positional channel layout bitmask
///
/// Each bit names a speaker position; the channel count is the number of
/// set bits and interleaved samples appear in ascending bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    pub const FRONT_LEFT: u32 = 1 << 0;
    pub const FRONT_RIGHT: u32 = 1 << 1;
    pub const FRONT_CENTER: u32 = 1 << 2;
    pub const LOW_FREQUENCY: u32 = 1 << 3;
    pub const BACK_LEFT: u32 = 1 << 4;
    pub const BACK_RIGHT: u32 = 1 << 5;
    pub const FRONT_LEFT_OF_CENTER: u32 = 1 << 6;
    pub const FRONT_RIGHT_OF_CENTER: u32 = 1 << 7;
    pub const BACK_CENTER: u32 = 1 << 8;
    pub const SIDE_LEFT: u32 = 1 << 9;
    pub const SIDE_RIGHT: u32 = 1 << 10;

    /// All positions this engine knows how to place
    pub const KNOWN_POSITIONS: u32 = (1 << 11) - 1;

    pub const MONO: ChannelMask = ChannelMask(Self::FRONT_LEFT);
    pub const STEREO: ChannelMask = ChannelMask(Self::FRONT_LEFT | Self::FRONT_RIGHT);
    pub const QUAD: ChannelMask = ChannelMask(
        Self::FRONT_LEFT | Self::FRONT_RIGHT | Self::BACK_LEFT | Self::BACK_RIGHT,
    );
    pub const SURROUND_5_1: ChannelMask = ChannelMask(
        Self::FRONT_LEFT
            | Self::FRONT_RIGHT
            | Self::FRONT_CENTER
            | Self::LOW_FREQUENCY
            | Self::BACK_LEFT
            | Self::BACK_RIGHT,
    );
    pub const SURROUND_7_1: ChannelMask = ChannelMask(
        Self::SURROUND_5_1.0 | Self::SIDE_LEFT | Self::SIDE_RIGHT,
    );

    /// Number of interleaved channels described by this mask
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the mask only uses known positions and has a usable width
    pub fn is_valid(&self) -> bool {
        let count = self.channel_count();
        self.0 & !Self::KNOWN_POSITIONS == 0 && count >= 1 && count <= MAX_TRACK_CHANNELS
    }

    #[inline]
    pub fn contains(&self, position: u32) -> bool {
        self.0 & position != 0
    }

    /// Iterate over set positions in interleave order
    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        (0..32).map(|bit| 1u32 << bit).filter(move |p| self.0 & p != 0)
    }
}

/// Format of a client track as declared at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub sample_format: SampleFormat,
    pub channel_mask: ChannelMask,
    pub sample_rate: u32,
}

impl TrackFormat {
    pub fn new(sample_format: SampleFormat, channel_mask: ChannelMask, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channel_mask,
            sample_rate,
        }
    }

    /// Stereo float at the given rate (the mixer's native shape)
    pub fn stereo_f32(sample_rate: u32) -> Self {
        Self::new(SampleFormat::F32, ChannelMask::STEREO, sample_rate)
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_mask.channel_count()
    }

    /// Bytes per interleaved frame
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.channel_count() * self.sample_format.bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_buffer_sums_frames() {
        let mut mix = StereoBuffer::silence(2);
        let mut other = StereoBuffer::silence(2);
        other.as_mut_slice()[1] = StereoSample::new(0.5, -0.25);
        mix.add_buffer(&other);
        mix.add_buffer(&other);
        assert_eq!(mix[0], StereoSample::silence());
        assert_eq!(mix[1], StereoSample::new(1.0, -0.5));
        assert_eq!(mix.peak(), 1.0);
    }

    #[test]
    fn test_set_len_from_capacity_does_not_reallocate() {
        let mut buffer = StereoBuffer::silence(512);
        let data_ptr = buffer.as_slice().as_ptr();
        buffer.set_len_from_capacity(128);
        assert_eq!(buffer.len(), 128);
        buffer.set_len_from_capacity(512);
        assert_eq!(buffer.len(), 512);
        assert_eq!(buffer.as_slice().as_ptr(), data_ptr);
    }

    #[test]
    fn test_channel_mask_counts() {
        assert_eq!(ChannelMask::MONO.channel_count(), 1);
        assert_eq!(ChannelMask::STEREO.channel_count(), 2);
        assert_eq!(ChannelMask::QUAD.channel_count(), 4);
        assert_eq!(ChannelMask::SURROUND_5_1.channel_count(), 6);
        assert_eq!(ChannelMask::SURROUND_7_1.channel_count(), 8);
        assert!(ChannelMask::SURROUND_7_1.is_valid());
        assert!(!ChannelMask(0).is_valid());
        assert!(!ChannelMask(1 << 20).is_valid());
    }

    #[test]
    fn test_track_frame_size() {
        let format = TrackFormat::new(SampleFormat::I16, ChannelMask::SURROUND_5_1, 44100);
        assert_eq!(format.frame_size(), 12);
        assert_eq!(TrackFormat::stereo_f32(48000).frame_size(), 8);
    }
}
