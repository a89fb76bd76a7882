//! Linear and cubic interpolating resamplers

use super::Resampler;
use crate::provider::{frame_at, BufferProvider};
use crate::types::StereoSample;

/// Interpolation kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// 2-point
    Linear,
    /// 4-point Catmull-Rom
    Cubic,
}

/// Fractional-phase resampler over a 4-frame history
///
/// The output position lies `phase` of the way from `history[1]` to
/// `history[2]`; `history[0]` and `history[3]` are the outer neighbours
/// the cubic kernel needs.
#[derive(Debug, Clone)]
pub struct InterpolatingResampler {
    kind: Interpolation,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    /// Input frames advanced per output frame
    step: f64,
    phase: f64,
    history: [StereoSample; 4],
    misaligned: u64,
}

impl InterpolatingResampler {
    pub fn new(kind: Interpolation, channels: usize, input_rate: u32, output_rate: u32) -> Self {
        Self {
            kind,
            channels,
            input_rate,
            output_rate,
            step: input_rate as f64 / output_rate as f64,
            phase: 0.0,
            history: [StereoSample::silence(); 4],
            misaligned: 0,
        }
    }

    #[inline]
    fn push(&mut self, frame: StereoSample) {
        self.history.rotate_left(1);
        self.history[3] = frame;
    }

    #[inline]
    fn interpolate(&self) -> StereoSample {
        let t = self.phase as f32;
        let [s0, s1, s2, s3] = self.history;
        match self.kind {
            Interpolation::Linear => lerp_sample(s1, s2, t),
            Interpolation::Cubic => cubic_interpolate(s0, s1, s2, s3, t),
        }
    }

    /// Emit frames until new input is needed or `out` is full
    #[inline]
    fn emit(&mut self, out: &mut [StereoSample], produced: &mut usize) {
        while *produced < out.len() && self.phase < 1.0 {
            out[*produced] = self.interpolate();
            *produced += 1;
            self.phase += self.step;
        }
    }
}

impl Resampler for InterpolatingResampler {
    fn resample(&mut self, out: &mut [StereoSample], provider: &mut dyn BufferProvider) -> usize {
        let mut produced = 0;
        self.emit(out, &mut produced);

        while produced < out.len() {
            let wanted = ((out.len() - produced) as f64 * self.step).ceil() as usize + 1;
            let buffer = provider.get_next_buffer(wanted);
            let frames = buffer.frames;
            if frames == 0 {
                break;
            }
            let Some(samples) = buffer.samples() else {
                provider.release_buffer(frames);
                self.misaligned += 1;
                break;
            };

            let mut consumed = 0;
            while consumed < frames && produced < out.len() {
                while self.phase >= 1.0 && consumed < frames {
                    self.push(frame_at(samples, self.channels, consumed));
                    consumed += 1;
                    self.phase -= 1.0;
                }
                self.emit(out, &mut produced);
            }
            provider.release_buffer(consumed);
        }
        produced
    }

    fn input_rate(&self) -> u32 {
        self.input_rate
    }

    fn set_input_rate(&mut self, rate: u32) -> bool {
        self.input_rate = rate;
        self.step = rate as f64 / self.output_rate as f64;
        true
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.history = [StereoSample::silence(); 4];
    }

    fn misaligned_buffers(&self) -> u64 {
        self.misaligned
    }
}

#[inline]
fn lerp_sample(s0: StereoSample, s1: StereoSample, t: f32) -> StereoSample {
    StereoSample {
        left: s0.left + (s1.left - s0.left) * t,
        right: s0.right + (s1.right - s0.right) * t,
    }
}

/// Catmull-Rom spline (tension 0.5) through four points, evaluated
/// between `s1` and `s2`
#[inline]
fn cubic_interpolate(
    s0: StereoSample,
    s1: StereoSample,
    s2: StereoSample,
    s3: StereoSample,
    t: f32,
) -> StereoSample {
    let t2 = t * t;
    let t3 = t2 * t;

    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    StereoSample {
        left: s0.left * c0 + s1.left * c1 + s2.left * c2 + s3.left * c3,
        right: s0.right * c0 + s1.right * c1 + s2.right * c2 + s3.right * c3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::VecProvider;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| i as f32 / frames as f32).collect()
    }

    #[test]
    fn test_half_rate_draws_half_the_input() {
        let mut provider = VecProvider::new(ramp(1000), 1);
        let mut resampler = InterpolatingResampler::new(Interpolation::Linear, 1, 24000, 48000);

        let mut out = [StereoSample::silence(); 100];
        assert_eq!(resampler.resample(&mut out, &mut provider), 100);

        let drawn = provider.frames_released();
        assert!((48..=52).contains(&drawn), "drew {} input frames", drawn);
    }

    #[test]
    fn test_equal_rates_pass_samples_through() {
        let input: Vec<f32> = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.0, 0.0];
        let mut provider = VecProvider::new(input, 2);
        let mut resampler = InterpolatingResampler::new(Interpolation::Cubic, 2, 48000, 48000);

        let mut out = [StereoSample::silence(); 5];
        assert_eq!(resampler.resample(&mut out, &mut provider), 5);
        // History latency: the first input frame lands on the fourth output
        assert_eq!(out[2], StereoSample::silence());
        assert_eq!(out[3], StereoSample::new(0.1, 0.2));
        assert_eq!(out[4], StereoSample::new(0.3, 0.4));
        assert_eq!(provider.frames_released(), 4);
    }

    #[test]
    fn test_starved_provider_returns_short() {
        let mut provider = VecProvider::new(vec![0.5; 10], 1);
        let mut resampler = InterpolatingResampler::new(Interpolation::Linear, 1, 48000, 48000);

        let mut out = [StereoSample::silence(); 64];
        let produced = resampler.resample(&mut out, &mut provider);
        assert!(produced < 64);
        assert_eq!(provider.frames_ready(), 0);
    }

    #[test]
    fn test_partial_chunks_match_whole_buffer() {
        let input = ramp(400);
        let mut whole = VecProvider::new(input.clone(), 1);
        let mut chunked = VecProvider::new(input, 1).with_max_chunk(7);

        let mut a = InterpolatingResampler::new(Interpolation::Cubic, 1, 44100, 48000);
        let mut b = a.clone();

        let mut out_a = [StereoSample::silence(); 128];
        let mut out_b = [StereoSample::silence(); 128];
        a.resample(&mut out_a, &mut whole);
        b.resample(&mut out_b, &mut chunked);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_cubic_passes_through_control_points() {
        let s = |v| StereoSample::mono(v);
        let at_start = cubic_interpolate(s(0.0), s(0.5), s(1.0), s(0.0), 0.0);
        let at_end = cubic_interpolate(s(0.0), s(0.5), s(1.0), s(0.0), 1.0);
        assert!((at_start.left - 0.5).abs() < 1e-6);
        assert!((at_end.left - 1.0).abs() < 1e-6);
    }
}
