//! Dispatch hooks and the gain kernels they select

use super::ramp::GainRamp;
use crate::types::{Sample, StereoSample};

/// Per-track processing, chosen during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackHook {
    /// Muted: input is consumed to keep the track's clock moving, but
    /// nothing is multiplied or summed
    Nop,
    /// Mono at the engine rate, expanded to both channels
    NoResampleMono,
    /// Stereo at the engine rate
    NoResampleStereo,
    /// Rate converted through the slot's resampler at unity gain
    Resample,
}

impl TrackHook {
    pub fn name(&self) -> &'static str {
        match self {
            TrackHook::Nop => "nop",
            TrackHook::NoResampleMono => "no-resample-mono",
            TrackHook::NoResampleStereo => "no-resample-stereo",
            TrackHook::Resample => "resample",
        }
    }
}

/// Per-cycle processing, chosen during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessHook {
    /// Nothing enabled: outputs are zeroed
    NoTracks,
    /// A single audible track at the engine rate writes its output
    /// directly, without zeroing first
    OneTrackNoResampling,
    /// Per-output groups, no resampling anywhere
    GenericNoResampling,
    /// Per-output groups, at least one resampled track
    GenericResampling,
}

impl ProcessHook {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessHook::NoTracks => "no-tracks",
            ProcessHook::OneTrackNoResampling => "one-track",
            ProcessHook::GenericNoResampling => "generic",
            ProcessHook::GenericResampling => "generic-resampling",
        }
    }
}

/// Apply volume and aux send to `frames`, writing into `out`
///
/// With `ACCUMULATE` the result is added to `out`, otherwise it replaces
/// it. The aux bus receives the unity-gain mono sum scaled by the aux
/// level and is only touched when `aux` is given. Returns true if a ramp
/// finished inside this span.
#[inline]
pub(crate) fn apply_gain<const ACCUMULATE: bool>(
    frames: impl Iterator<Item = StereoSample>,
    out: &mut [StereoSample],
    mut aux: Option<&mut [Sample]>,
    volume: &mut GainRamp<2>,
    aux_level: &mut GainRamp<1>,
) -> bool {
    if !volume.is_ramping() && !aux_level.is_ramping() {
        let [left, right] = volume.current();
        let [send] = aux_level.current();
        for (i, (dst, src)) in out.iter_mut().zip(frames).enumerate() {
            let scaled = StereoSample::new(src.left * left, src.right * right);
            if ACCUMULATE {
                *dst += scaled;
            } else {
                *dst = scaled;
            }
            if let Some(aux) = aux.as_deref_mut() {
                aux[i] += (src.left + src.right) * 0.5 * send;
            }
        }
        return false;
    }

    let mut finished = false;
    for (i, (dst, src)) in out.iter_mut().zip(frames).enumerate() {
        let [left, right] = volume.current();
        let [send] = aux_level.current();
        let scaled = StereoSample::new(src.left * left, src.right * right);
        if ACCUMULATE {
            *dst += scaled;
        } else {
            *dst = scaled;
        }
        if let Some(aux) = aux.as_deref_mut() {
            aux[i] += (src.left + src.right) * 0.5 * send;
        }
        finished |= volume.advance();
        finished |= aux_level.advance();
    }
    finished
}

/// Frames of an interleaved float buffer in the mixer's stereo shape
#[inline]
pub(crate) fn stereo_frames(
    samples: &[Sample],
    channels: usize,
) -> impl Iterator<Item = StereoSample> + '_ {
    let mono = channels == 1;
    samples.chunks_exact(channels).map(move |frame| {
        if mono {
            StereoSample::mono(frame[0])
        } else {
            StereoSample::new(frame[0], frame[1])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_gain_accumulates() {
        let mut out = [StereoSample::new(1.0, 1.0); 2];
        let mut volume = GainRamp::new([0.5, 0.25]);
        let mut aux = GainRamp::new([0.0]);
        let input = [StereoSample::new(2.0, 4.0); 2];

        let finished = apply_gain::<true>(input.iter().copied(), &mut out, None, &mut volume, &mut aux);
        assert!(!finished);
        assert_eq!(out[0], StereoSample::new(2.0, 2.0));
    }

    #[test]
    fn test_overwrite_ignores_previous_content() {
        let mut out = [StereoSample::new(9.0, 9.0); 1];
        let mut volume = GainRamp::new([1.0, 1.0]);
        let mut aux = GainRamp::new([0.0]);
        let input = [StereoSample::new(0.5, -0.5)];

        apply_gain::<false>(input.iter().copied(), &mut out, None, &mut volume, &mut aux);
        assert_eq!(out[0], StereoSample::new(0.5, -0.5));
    }

    #[test]
    fn test_aux_send_uses_unity_input() {
        let mut out = [StereoSample::silence(); 1];
        let mut bus = [0.0f32; 1];
        let mut volume = GainRamp::new([0.0, 0.0]);
        let mut aux = GainRamp::new([0.5]);
        let input = [StereoSample::new(1.0, 0.0)];

        apply_gain::<true>(input.iter().copied(), &mut out, Some(&mut bus), &mut volume, &mut aux);
        assert_eq!(out[0], StereoSample::silence());
        assert!((bus[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_reports_completion() {
        let mut out = [StereoSample::silence(); 8];
        let mut volume = GainRamp::new([0.0, 0.0]);
        volume.set_target([1.0, 1.0], 4);
        let mut aux = GainRamp::new([0.0]);
        let input = [StereoSample::mono(1.0); 8];

        assert!(apply_gain::<true>(input.iter().copied(), &mut out, None, &mut volume, &mut aux));
        assert_eq!(out[0].left, 0.0);
        assert!((out[2].left - 0.5).abs() < 1e-6);
        assert_eq!(out[7].left, 1.0);
    }

    #[test]
    fn test_stereo_frames_expand_mono() {
        let frames: Vec<_> = stereo_frames(&[0.1, 0.2], 1).collect();
        assert_eq!(frames, vec![StereoSample::mono(0.1), StereoSample::mono(0.2)]);
    }
}
