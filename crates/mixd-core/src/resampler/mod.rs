//! Sample rate conversion
//!
//! A resampler sits between a track's chain head and the mixer. It pulls
//! frames at the track's rate and produces stereo frames at the engine rate,
//! always at unity gain: volume and aux send are applied by the mixer
//! afterwards, so send levels never interact with interpolation.
//!
//! Available qualities:
//! - **Linear**: 2-point interpolation, cheapest
//! - **Cubic**: 4-point Catmull-Rom
//! - **High**: rubato's septic polynomial resampler, fixed output chunks

mod high;
mod interp;

pub use high::HighQualityResampler;
pub use interp::{Interpolation, InterpolatingResampler};

use crate::config::ResamplerQuality;
use crate::error::{MixerError, MixerResult};
use crate::provider::BufferProvider;
use crate::types::StereoSample;

/// Rate converter pulling from a buffer provider
pub trait Resampler: Send {
    /// Fill `out` with engine-rate frames, pulling as much input as needed
    ///
    /// Returns frames produced. Fewer than `out.len()` means the provider
    /// ran dry; the caller fills the rest with silence.
    fn resample(&mut self, out: &mut [StereoSample], provider: &mut dyn BufferProvider) -> usize;

    /// Track-side rate
    fn input_rate(&self) -> u32;

    /// Retune for a new track rate; false if this instance cannot, in which
    /// case the caller builds a new resampler
    fn set_input_rate(&mut self, rate: u32) -> bool;

    /// Drop interpolation history and buffered frames
    fn reset(&mut self);

    /// Input buffers that could not be read and were treated as silence
    fn misaligned_buffers(&self) -> u64;
}

/// Build a resampler for `channels` (1 or 2) input channels
///
/// `block_frames` is the mixer's per-cycle output size; the high quality
/// resampler produces in chunks of that size.
pub fn create_resampler(
    quality: ResamplerQuality,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    block_frames: usize,
) -> MixerResult<Box<dyn Resampler>> {
    if input_rate == 0 || output_rate == 0 {
        return Err(MixerError::InvalidSampleRate {
            rate: input_rate,
            engine_rate: output_rate,
        });
    }
    if !(1..=2).contains(&channels) {
        return Err(MixerError::ResamplerConstruction(format!(
            "{} input channels",
            channels
        )));
    }

    Ok(match quality {
        ResamplerQuality::Linear => Box::new(InterpolatingResampler::new(
            Interpolation::Linear,
            channels,
            input_rate,
            output_rate,
        )),
        ResamplerQuality::Cubic => Box::new(InterpolatingResampler::new(
            Interpolation::Cubic,
            channels,
            input_rate,
            output_rate,
        )),
        ResamplerQuality::High => Box::new(HighQualityResampler::new(
            channels,
            input_rate,
            output_rate,
            block_frames,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_bad_input() {
        assert!(create_resampler(ResamplerQuality::Linear, 2, 0, 48000, 256).is_err());
        assert!(create_resampler(ResamplerQuality::Cubic, 6, 44100, 48000, 256).is_err());
    }

    #[test]
    fn test_factory_builds_every_quality() {
        for quality in [
            ResamplerQuality::Linear,
            ResamplerQuality::Cubic,
            ResamplerQuality::High,
        ] {
            let resampler = create_resampler(quality, 2, 44100, 48000, 256).unwrap();
            assert_eq!(resampler.input_rate(), 44100);
        }
    }
}
