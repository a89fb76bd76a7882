//! Linear gain ramps

/// Per-channel gain moving linearly toward a target
///
/// A ramp of `L` frames applies `current + i * inc` to frame `i` and lands
/// exactly on the target after `L` frames; the increment is then forced to
/// zero so a finished ramp is indistinguishable from a constant gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp<const N: usize> {
    current: [f32; N],
    target: [f32; N],
    inc: [f32; N],
    remaining: usize,
}

impl<const N: usize> GainRamp<N> {
    pub fn new(value: [f32; N]) -> Self {
        Self {
            current: value,
            target: value,
            inc: [0.0; N],
            remaining: 0,
        }
    }

    /// Gain applied to the next frame
    #[inline]
    pub fn current(&self) -> [f32; N] {
        self.current
    }

    #[inline]
    pub fn target(&self) -> [f32; N] {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// True when the gain is zero and will stay zero
    #[inline]
    pub fn is_silent(&self) -> bool {
        !self.is_ramping() && self.current.iter().all(|&g| g == 0.0)
    }

    /// Ramp to `target` over `frames` frames (0 = jump)
    ///
    /// Returns false if `target` is already the target.
    pub fn set_target(&mut self, target: [f32; N], frames: usize) -> bool {
        if target == self.target {
            return false;
        }
        if frames == 0 {
            self.jump(target);
            return true;
        }
        self.target = target;
        for ((inc, &current), &target) in self.inc.iter_mut().zip(&self.current).zip(&target) {
            *inc = (target - current) / frames as f32;
        }
        self.remaining = frames;
        true
    }

    /// Set the gain immediately, cancelling any ramp
    pub fn jump(&mut self, value: [f32; N]) {
        self.current = value;
        self.target = value;
        self.inc = [0.0; N];
        self.remaining = 0;
    }

    /// Step one frame; returns true when this step finished the ramp
    #[inline]
    pub fn advance(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.current = self.target;
            self.inc = [0.0; N];
            true
        } else {
            for (current, inc) in self.current.iter_mut().zip(&self.inc) {
                *current += inc;
            }
            false
        }
    }

    /// Step `frames` frames at once (frames that were not mixed)
    pub fn advance_by(&mut self, frames: usize) -> bool {
        if self.remaining == 0 || frames == 0 {
            return false;
        }
        if frames >= self.remaining {
            self.remaining = 1;
            return self.advance();
        }
        self.remaining -= frames;
        for (current, inc) in self.current.iter_mut().zip(&self.inc) {
            *current += inc * frames as f32;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_lands_on_target() {
        let mut ramp = GainRamp::new([0.2, 1.0]);
        assert!(ramp.set_target([0.8, 0.0], 100));

        let mut applied = Vec::new();
        let mut finished = false;
        for _ in 0..100 {
            applied.push(ramp.current());
            finished = ramp.advance();
        }
        assert!(finished);
        assert_eq!(ramp.current(), [0.8, 0.0]);
        assert!(!ramp.is_ramping());

        // Monotonic toward the target on both channels
        for pair in applied.windows(2) {
            assert!(pair[1][0] >= pair[0][0]);
            assert!(pair[1][1] <= pair[0][1]);
        }
        assert_eq!(applied[0], [0.2, 1.0]);
    }

    #[test]
    fn test_same_target_is_not_a_change() {
        let mut ramp = GainRamp::new([0.5]);
        assert!(!ramp.set_target([0.5], 64));
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn test_zero_length_ramp_jumps() {
        let mut ramp = GainRamp::new([1.0, 1.0]);
        ramp.set_target([0.0, 0.0], 0);
        assert!(ramp.is_silent());
    }

    #[test]
    fn test_silent_only_after_ramp_completes() {
        let mut ramp = GainRamp::new([1.0]);
        ramp.set_target([0.0], 4);
        for _ in 0..3 {
            ramp.advance();
            assert!(!ramp.is_silent());
        }
        ramp.advance();
        assert!(ramp.is_silent());
    }

    #[test]
    fn test_advance_by() {
        let mut ramp = GainRamp::new([0.0]);
        ramp.set_target([1.0], 10);
        assert!(!ramp.advance_by(4));
        assert!((ramp.current()[0] - 0.4).abs() < 1e-6);
        assert!(ramp.advance_by(100));
        assert_eq!(ramp.current(), [1.0]);
    }
}
