//! High quality resampling through rubato

use rubato::{FastFixedOut, PolynomialDegree, Resampler as RubatoResampler};

use super::Resampler;
use crate::error::{MixerError, MixerResult};
use crate::provider::BufferProvider;
use crate::types::StereoSample;

/// How far the track rate may later drift from the rate at construction
/// before a rebuild is needed
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// rubato `FastFixedOut` with planar staging
///
/// rubato consumes a variable number of input frames and produces a fixed
/// chunk. Input is gathered across calls until a chunk's worth is staged;
/// produced frames are queued and drained into the caller's buffer. All
/// staging is sized at construction.
pub struct HighQualityResampler {
    inner: FastFixedOut<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    /// Frames of `output` produced by the last chunk
    output_len: usize,
    /// Frames of `output` already handed out
    output_pos: usize,
    misaligned: u64,
    failures: u64,
}

impl HighQualityResampler {
    pub fn new(
        channels: usize,
        input_rate: u32,
        output_rate: u32,
        chunk_frames: usize,
    ) -> MixerResult<Self> {
        let inner = FastFixedOut::<f32>::new(
            output_rate as f64 / input_rate as f64,
            MAX_RELATIVE_RATIO,
            PolynomialDegree::Septic,
            chunk_frames.max(1),
            channels,
        )
        .map_err(|e| MixerError::ResamplerConstruction(e.to_string()))?;

        let input_capacity = inner.input_frames_max();
        let input = (0..channels)
            .map(|_| Vec::with_capacity(input_capacity))
            .collect();
        let output = (0..channels)
            .map(|_| vec![0.0; inner.output_frames_max()])
            .collect();

        Ok(Self {
            inner,
            channels,
            input_rate,
            output_rate,
            input,
            output,
            output_len: 0,
            output_pos: 0,
            misaligned: 0,
            failures: 0,
        })
    }

    /// Chunks rubato refused to process
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn drain(&mut self, out: &mut [StereoSample], produced: &mut usize) {
        while *produced < out.len() && self.output_pos < self.output_len {
            let left = self.output[0][self.output_pos];
            let right = self.output[self.channels - 1][self.output_pos];
            out[*produced] = StereoSample::new(left, right);
            *produced += 1;
            self.output_pos += 1;
        }
    }

    /// Stage input until rubato's next chunk is covered; false if starved
    fn stage_input(&mut self, provider: &mut dyn BufferProvider) -> bool {
        let needed = self.inner.input_frames_next();
        while self.input[0].len() < needed {
            let buffer = provider.get_next_buffer(needed - self.input[0].len());
            let frames = buffer.frames;
            if frames == 0 {
                return false;
            }
            match buffer.samples() {
                Some(samples) => {
                    for frame in samples.chunks_exact(self.channels).take(frames) {
                        for (channel, sample) in self.input.iter_mut().zip(frame) {
                            channel.push(*sample);
                        }
                    }
                }
                None => {
                    self.misaligned += 1;
                    for channel in &mut self.input {
                        channel.extend(std::iter::repeat(0.0).take(frames));
                    }
                }
            }
            provider.release_buffer(frames);
        }
        true
    }
}

impl Resampler for HighQualityResampler {
    fn resample(&mut self, out: &mut [StereoSample], provider: &mut dyn BufferProvider) -> usize {
        let mut produced = 0;
        loop {
            self.drain(out, &mut produced);
            if produced == out.len() || !self.stage_input(provider) {
                return produced;
            }

            match self.inner.process_into_buffer(&self.input, &mut self.output, None) {
                Ok((_, written)) => {
                    self.output_len = written;
                    self.output_pos = 0;
                }
                Err(_) => {
                    self.failures += 1;
                    self.output_len = 0;
                    self.output_pos = 0;
                }
            }
            for channel in &mut self.input {
                channel.clear();
            }
            if self.output_len == 0 {
                return produced;
            }
        }
    }

    fn input_rate(&self) -> u32 {
        self.input_rate
    }

    fn set_input_rate(&mut self, rate: u32) -> bool {
        let ratio = self.output_rate as f64 / rate as f64;
        if self.inner.set_resample_ratio(ratio, true).is_ok() {
            self.input_rate = rate;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
        for channel in &mut self.input {
            channel.clear();
        }
        self.output_len = 0;
        self.output_pos = 0;
    }

    fn misaligned_buffers(&self) -> u64 {
        self.misaligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::VecProvider;

    #[test]
    fn test_produces_full_blocks_from_enough_input() {
        let input: Vec<f32> = (0..4800)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let mut provider = VecProvider::new(input, 1);
        let mut resampler = HighQualityResampler::new(1, 24000, 48000, 256).unwrap();

        let mut out = [StereoSample::silence(); 256];
        for _ in 0..4 {
            assert_eq!(resampler.resample(&mut out, &mut provider), 256);
            assert!(out.iter().all(|s| s.left == s.right && s.peak() < 1.0));
        }
        // Roughly half an output frame per input frame
        let drawn = provider.frames_released();
        assert!(drawn > 400 && drawn < 700, "drew {} input frames", drawn);
    }

    #[test]
    fn test_starved_input_is_kept_for_next_call() {
        let mut provider = VecProvider::new(vec![0.1; 20], 2);
        let mut resampler = HighQualityResampler::new(2, 48000, 48000, 256).unwrap();

        let mut out = [StereoSample::silence(); 256];
        assert_eq!(resampler.resample(&mut out, &mut provider), 0);
        assert_eq!(provider.frames_ready(), 0);
    }
}
