//! Sample container conversion
//!
//! Everything is converted through 32-bit float, the mixer's working format.
//! Reading accepts unaligned byte slices (client rings carry raw bytes);
//! writing rounds to nearest and clamps to the target's range so loud mixes
//! saturate instead of wrapping.
//!
//! `u8` and `i16` survive an integer -> float -> integer round trip
//! unchanged. `i32` carries more precision than an f32 mantissa and does not.

use crate::types::{Sample, SampleFormat};

const U8_SCALE: f32 = 128.0;
const I16_SCALE: f32 = 32768.0;
const I32_SCALE: f64 = 2147483648.0;

/// Convert interleaved samples of `format` to float
///
/// Converts `min(src samples, dst.len())` samples and returns that count.
pub fn to_float(format: SampleFormat, src: &[u8], dst: &mut [Sample]) -> usize {
    let width = format.bytes_per_sample();
    let count = (src.len() / width).min(dst.len());
    let src = &src[..count * width];
    let dst = &mut dst[..count];

    match format {
        SampleFormat::U8 => {
            for (out, &byte) in dst.iter_mut().zip(src) {
                *out = (byte as f32 - U8_SCALE) / U8_SCALE;
            }
        }
        SampleFormat::I16 => {
            for (out, bytes) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *out = i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / I16_SCALE;
            }
        }
        SampleFormat::I32 => {
            for (out, bytes) in dst.iter_mut().zip(src.chunks_exact(4)) {
                let value = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                *out = (value as f64 / I32_SCALE) as f32;
            }
        }
        SampleFormat::F32 => {
            for (out, bytes) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *out = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }
    }
    count
}

/// Convert float samples to `format`, rounding and clamping
///
/// Converts `min(src.len(), dst samples)` samples and returns that count.
pub fn from_float(format: SampleFormat, src: &[Sample], dst: &mut [u8]) -> usize {
    let width = format.bytes_per_sample();
    let count = src.len().min(dst.len() / width);
    let src = &src[..count];
    let dst = &mut dst[..count * width];

    match format {
        SampleFormat::U8 => {
            for (out, &sample) in dst.iter_mut().zip(src) {
                *out = u8_from_float(sample);
            }
        }
        SampleFormat::I16 => {
            for (out, &sample) in dst.chunks_exact_mut(2).zip(src) {
                out.copy_from_slice(&i16_from_float(sample).to_ne_bytes());
            }
        }
        SampleFormat::I32 => {
            for (out, &sample) in dst.chunks_exact_mut(4).zip(src) {
                out.copy_from_slice(&i32_from_float(sample).to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for (out, &sample) in dst.chunks_exact_mut(4).zip(src) {
                out.copy_from_slice(&clamp_float(sample).to_ne_bytes());
            }
        }
    }
    count
}

#[inline]
pub fn u8_from_float(sample: Sample) -> u8 {
    let scaled = (sample * U8_SCALE).round();
    (scaled.clamp(-128.0, 127.0) as i16 + 128) as u8
}

#[inline]
pub fn i16_from_float(sample: Sample) -> i16 {
    // NaN casts to 0
    (sample * I16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

#[inline]
pub fn i32_from_float(sample: Sample) -> i32 {
    (sample as f64 * I32_SCALE)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[inline]
pub fn clamp_float(sample: Sample) -> Sample {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i16_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_i16_round_trip_is_exact() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 100, 32767];
        let bytes = i16_bytes(&original);

        let mut floats = vec![0.0; original.len()];
        assert_eq!(to_float(SampleFormat::I16, &bytes, &mut floats), original.len());

        let mut back = vec![0u8; bytes.len()];
        from_float(SampleFormat::I16, &floats, &mut back);
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_u8_round_trip_is_exact() {
        let original: Vec<u8> = (0..=255).collect();
        let mut floats = vec![0.0; 256];
        to_float(SampleFormat::U8, &original, &mut floats);
        assert_eq!(floats[128], 0.0);
        assert_eq!(floats[0], -1.0);

        let mut back = vec![0u8; 256];
        from_float(SampleFormat::U8, &floats, &mut back);
        assert_eq!(back, original);
    }

    #[test]
    fn test_from_float_saturates() {
        assert_eq!(i16_from_float(2.0), i16::MAX);
        assert_eq!(i16_from_float(-2.0), i16::MIN);
        assert_eq!(i16_from_float(f32::NAN), 0);
        assert_eq!(u8_from_float(5.0), 255);
        assert_eq!(u8_from_float(-5.0), 0);
        assert_eq!(i32_from_float(1.0), i32::MAX);
        assert_eq!(clamp_float(1.5), 1.0);
    }

    #[test]
    fn test_unaligned_source() {
        let bytes = i16_bytes(&[0, 16384, -16384]);
        let mut padded = vec![0u8];
        padded.extend_from_slice(&bytes);

        let mut floats = [0.0; 3];
        assert_eq!(to_float(SampleFormat::I16, &padded[1..], &mut floats), 3);
        assert_eq!(floats, [0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_count_is_bounded_by_destination() {
        let bytes = i16_bytes(&[1, 2, 3, 4]);
        let mut floats = [0.0; 2];
        assert_eq!(to_float(SampleFormat::I16, &bytes, &mut floats), 2);
    }
}
