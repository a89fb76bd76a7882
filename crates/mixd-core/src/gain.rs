//! Gain representations
//!
//! The engine mixes with plain float gains in [0.0, 1.0]. Clients that
//! speak the legacy fixed-point protocol hand over U4.12 values (unity is
//! `0x1000`), optionally packed as left/right halves of a `u32`. Both
//! representations are converted here, at the boundary, so nothing past
//! the track model ever sees fixed-point gain.

/// Unity gain in U4.12
pub const UNITY_GAIN_U4_12: u16 = 0x1000;

/// Largest representable U4.12 gain (just under 16.0)
pub const MAX_GAIN_U4_12: u16 = 0xFFFF;

/// Unity gain as float
pub const UNITY_GAIN: f32 = 1.0;

/// Convert U4.12 fixed-point gain to float
#[inline]
pub fn float_from_u4_12(gain: u16) -> f32 {
    gain as f32 / UNITY_GAIN_U4_12 as f32
}

/// Convert float gain to U4.12, clamping instead of wrapping
///
/// Negative and NaN inputs map to zero; anything at or above the maximum
/// representable value maps to `MAX_GAIN_U4_12`.
#[inline]
pub fn u4_12_from_float(gain: f32) -> u16 {
    if !(gain > 0.0) {
        return 0;
    }
    let scaled = gain * UNITY_GAIN_U4_12 as f32 + 0.5;
    if scaled >= MAX_GAIN_U4_12 as f32 {
        MAX_GAIN_U4_12
    } else {
        scaled as u16
    }
}

/// Split a packed left/right U4.12 word (left in the low half)
#[inline]
pub fn unpack_lr_u4_12(packed: u32) -> (u16, u16) {
    ((packed & 0xFFFF) as u16, (packed >> 16) as u16)
}

/// Pack left/right U4.12 gains into one word (left in the low half)
#[inline]
pub fn pack_lr_u4_12(left: u16, right: u16) -> u32 {
    (left as u32) | ((right as u32) << 16)
}

/// Clamp a float gain read from client-writable memory
///
/// Values outside [0.0, 1.0] and non-finite values can only come from a
/// misbehaving client; they are never allowed to reach the mixer.
#[inline]
pub fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(0.0, UNITY_GAIN)
    } else {
        0.0
    }
}

/// Stereo gain pair as read from a volume provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

impl StereoGain {
    pub const UNITY: StereoGain = StereoGain {
        left: UNITY_GAIN,
        right: UNITY_GAIN,
    };

    pub const SILENT: StereoGain = StereoGain {
        left: 0.0,
        right: 0.0,
    };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Same clamping as [`sanitize_gain`], per channel
    pub fn sanitized(self) -> Self {
        Self {
            left: sanitize_gain(self.left),
            right: sanitize_gain(self.right),
        }
    }

    /// Combine with a master gain (both factors already sanitized)
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }

    /// Pack both channels into one `u64` so they can be published together
    #[inline]
    pub fn to_bits(self) -> u64 {
        (self.left.to_bits() as u64) | ((self.right.to_bits() as u64) << 32)
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            left: f32::from_bits(bits as u32),
            right: f32::from_bits((bits >> 32) as u32),
        }
    }

    /// Build from a packed U4.12 left/right word
    pub fn from_packed_u4_12(packed: u32) -> Self {
        let (left, right) = unpack_lr_u4_12(packed);
        Self {
            left: float_from_u4_12(left),
            right: float_from_u4_12(right),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

impl Default for StereoGain {
    fn default() -> Self {
        Self::UNITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_round_trip() {
        assert_eq!(float_from_u4_12(UNITY_GAIN_U4_12), 1.0);
        assert_eq!(u4_12_from_float(1.0), UNITY_GAIN_U4_12);
        assert_eq!(u4_12_from_float(0.5), 0x0800);
    }

    #[test]
    fn test_u4_12_clamps_instead_of_wrapping() {
        assert_eq!(u4_12_from_float(16.0), MAX_GAIN_U4_12);
        assert_eq!(u4_12_from_float(1.0e9), MAX_GAIN_U4_12);
        assert_eq!(u4_12_from_float(-3.0), 0);
        assert_eq!(u4_12_from_float(f32::NAN), 0);
    }

    #[test]
    fn test_pack_unpack() {
        let packed = pack_lr_u4_12(0x1000, 0x0400);
        assert_eq!(unpack_lr_u4_12(packed), (0x1000, 0x0400));
        let gain = StereoGain::from_packed_u4_12(packed);
        assert_eq!(gain, StereoGain::new(1.0, 0.25));
    }

    #[test]
    fn test_sanitize_gain() {
        assert_eq!(sanitize_gain(0.25), 0.25);
        assert_eq!(sanitize_gain(4.0), 1.0);
        assert_eq!(sanitize_gain(-1.0), 0.0);
        assert_eq!(sanitize_gain(f32::NAN), 0.0);
        assert_eq!(sanitize_gain(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_bits_round_trip() {
        let gain = StereoGain::new(0.125, 0.75);
        assert_eq!(StereoGain::from_bits(gain.to_bits()), gain);
    }
}
