//! Channel reduction stage
//!
//! Tracks wider than stereo are folded to the mixer's two channels. The
//! fold itself is a [`DownmixAlgorithm`] so an effect-provided downmixer
//! can replace the built-in matrix.

use super::{BufferProvider, CopyStage, CopyTransform};
use crate::error::{MixerError, MixerResult};
use crate::types::{ChannelMask, Sample, MAX_TRACK_CHANNELS, MIXER_CHANNELS};

/// -3dB
const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Folds interleaved frames of `channels` channels into stereo
pub trait DownmixAlgorithm: Send {
    /// `src` holds whole input frames, `dst` the same number of stereo frames
    fn downmix(&mut self, src: &[Sample], channels: usize, dst: &mut [Sample]);
}

/// Static per-position mixing matrix
///
/// Front channels pass straight through; center and LFE go to both sides at
/// -3dB; surround and side channels go to their own side at -3dB. The result
/// is not normalized, so a full-scale 5.1 source can exceed 1.0 before the
/// sink clamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMix {
    coefficients: [[f32; MIXER_CHANNELS]; MAX_TRACK_CHANNELS],
    channels: usize,
}

impl ChannelMix {
    pub fn for_mask(mask: ChannelMask) -> MixerResult<Self> {
        if !mask.is_valid() {
            return Err(MixerError::unsupported_mask(mask));
        }
        let mut coefficients = [[0.0; MIXER_CHANNELS]; MAX_TRACK_CHANNELS];
        for (index, position) in mask.positions().enumerate() {
            coefficients[index] = match position {
                ChannelMask::FRONT_LEFT => [1.0, 0.0],
                ChannelMask::FRONT_RIGHT => [0.0, 1.0],
                ChannelMask::FRONT_CENTER | ChannelMask::LOW_FREQUENCY => [MINUS_3DB, MINUS_3DB],
                ChannelMask::BACK_CENTER => [0.5, 0.5],
                ChannelMask::BACK_LEFT
                | ChannelMask::SIDE_LEFT
                | ChannelMask::FRONT_LEFT_OF_CENTER => [MINUS_3DB, 0.0],
                ChannelMask::BACK_RIGHT
                | ChannelMask::SIDE_RIGHT
                | ChannelMask::FRONT_RIGHT_OF_CENTER => [0.0, MINUS_3DB],
                _ => return Err(MixerError::unsupported_mask(mask)),
            };
        }
        Ok(Self {
            coefficients,
            channels: mask.channel_count(),
        })
    }

    pub fn coefficient(&self, channel: usize) -> [f32; MIXER_CHANNELS] {
        self.coefficients[channel]
    }
}

impl DownmixAlgorithm for ChannelMix {
    fn downmix(&mut self, src: &[Sample], channels: usize, dst: &mut [Sample]) {
        debug_assert_eq!(channels, self.channels);
        for (frame, out) in src
            .chunks_exact(channels)
            .zip(dst.chunks_exact_mut(MIXER_CHANNELS))
        {
            let mut left = 0.0;
            let mut right = 0.0;
            for (sample, [to_left, to_right]) in frame.iter().zip(&self.coefficients) {
                left += sample * to_left;
                right += sample * to_right;
            }
            out[0] = left;
            out[1] = right;
        }
    }
}

/// Transform half of a [`Downmixer`]
pub struct Downmix {
    algorithm: Box<dyn DownmixAlgorithm>,
    channels: usize,
}

impl CopyTransform for Downmix {
    fn output_channels(&self) -> usize {
        MIXER_CHANNELS
    }

    fn transform(&mut self, src: &[u8], frames: usize, dst: &mut [Sample]) -> bool {
        let Ok(src) = bytemuck::try_cast_slice::<u8, Sample>(src) else {
            return false;
        };
        let samples = frames * self.channels;
        if src.len() < samples {
            return false;
        }
        self.algorithm.downmix(&src[..samples], self.channels, dst);
        true
    }
}

/// Downmixing stage
pub type Downmixer = CopyStage<Downmix>;

impl Downmixer {
    /// Downmixer using the built-in matrix for `mask`
    ///
    /// Callers skip this stage for mono and stereo tracks.
    pub fn for_mask(
        upstream: Box<dyn BufferProvider>,
        mask: ChannelMask,
        max_frames: usize,
    ) -> MixerResult<Self> {
        let matrix = ChannelMix::for_mask(mask)?;
        Ok(Self::with_algorithm(upstream, Box::new(matrix), mask.channel_count(), max_frames))
    }

    pub fn with_algorithm(
        upstream: Box<dyn BufferProvider>,
        algorithm: Box<dyn DownmixAlgorithm>,
        channels: usize,
        max_frames: usize,
    ) -> Self {
        CopyStage::new(upstream, Downmix { algorithm, channels }, max_frames)
    }

    /// Swap the fold, e.g. for an effect-provided downmixer
    pub fn set_algorithm(&mut self, algorithm: Box<dyn DownmixAlgorithm>) {
        self.transform_mut().algorithm = algorithm;
    }

    pub fn input_channels(&self) -> usize {
        self.transform().channels
    }
}
