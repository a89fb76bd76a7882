//! Engine policy configuration
//!
//! Every tunable the mixing paths consult lives here instead of being
//! hardcoded: ramp length, retry budget, resample ratio cap, warm-up and
//! underrun classification. Values are clamped into workable ranges by
//! [`EngineConfig::sanitized`] before the engine starts.

use serde::{Deserialize, Serialize};

use crate::types::{SampleFormat, SAMPLE_RATE};

/// Default normal-path mix period in frames (20ms at 48kHz)
pub const DEFAULT_FRAME_COUNT: usize = 960;

/// Default fast-path period in frames (5ms at 48kHz)
pub const DEFAULT_FAST_FRAME_COUNT: usize = 240;

/// Hard upper bound on fast track slots (slot leases live in a `u32` mask)
pub const MAX_FAST_TRACKS: usize = 32;

/// Interpolation used when a track's rate differs from the engine's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// 2-point linear interpolation
    #[default]
    Linear,
    /// 4-point Catmull-Rom interpolation
    Cubic,
    /// Polynomial resampler from rubato, fixed output chunks
    High,
}

/// Device power state as seen by the engine
///
/// Applied at reconfiguration time rather than read from global state.
/// Low power trades latency for fewer wakeups of the normal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Interactive,
    LowPower,
}

/// Fast-path warm-up detection
///
/// The first cycles after leaving idle are scheduling noise. A cycle is
/// "in bounds" when its period is within `tolerance` of nominal; warm-up
/// ends after `min_cycles` consecutive in-bounds cycles, or unconditionally
/// after `max_cycles`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupPolicy {
    pub min_cycles: u32,
    pub max_cycles: u32,
    /// Allowed relative deviation from the nominal period (0.5 = ±50%)
    pub tolerance: f64,
}

impl Default for WarmupPolicy {
    fn default() -> Self {
        Self {
            min_cycles: 2,
            max_cycles: 10,
            tolerance: 0.5,
        }
    }
}

/// Fast track underrun classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderrunPolicy {
    /// Frames a fast track must have ready to count as "full"
    /// (0 = one fast period)
    pub full_frames: usize,
    /// Mix partially filled fast tracks (padded with silence) instead of
    /// skipping them for the cycle
    pub mix_partial: bool,
}

impl Default for UnderrunPolicy {
    fn default() -> Self {
        Self {
            full_frames: 0,
            mix_partial: true,
        }
    }
}

/// Configuration for the mixing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine (and sink) sample rate
    pub sample_rate: u32,

    /// Normal-path mix period in frames
    pub frame_count: usize,

    /// Run a fast-path thread in front of the sink
    /// When false, the control loop writes to the sink directly.
    pub fast_path: bool,

    /// Fast-path period in frames
    pub fast_frame_count: usize,

    /// Number of fast track slots (slot 0 carries the normal mix)
    pub fast_tracks: usize,

    /// Mixer slots available to normal tracks
    pub mixer_slots: usize,

    /// Volume ramp length in frames (0 = exactly one processing block)
    pub volume_ramp_frames: usize,

    /// Consecutive starved cycles tolerated before a track is disabled
    pub max_track_retries: u32,

    /// Highest track/engine sample rate ratio accepted by the resampler
    pub max_resample_ratio: f64,

    pub resampler_quality: ResamplerQuality,

    /// Inactivity before the output goes to standby
    pub standby_delay_ms: u64,

    pub warmup: WarmupPolicy,

    pub underrun: UnderrunPolicy,

    /// Capacity of the normal→fast pipe, in normal periods
    pub pipe_depth_periods: usize,

    pub power_state: PowerState,

    /// Sink formats in order of preference
    pub sink_formats: Vec<SampleFormat>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_count: DEFAULT_FRAME_COUNT,
            fast_path: true,
            fast_frame_count: DEFAULT_FAST_FRAME_COUNT,
            fast_tracks: 8,
            mixer_slots: 32,
            volume_ramp_frames: 0,
            max_track_retries: 50,
            max_resample_ratio: 2.0,
            resampler_quality: ResamplerQuality::default(),
            standby_delay_ms: 3000,
            warmup: WarmupPolicy::default(),
            underrun: UnderrunPolicy::default(),
            pipe_depth_periods: 4,
            power_state: PowerState::default(),
            sink_formats: vec![SampleFormat::F32, SampleFormat::I16],
        }
    }
}

impl EngineConfig {
    /// Clamp every field into a range the engine can run with
    ///
    /// Logs each adjustment; a config file is user input.
    pub fn sanitized(mut self) -> Self {
        if !(8000..=192_000).contains(&self.sample_rate) {
            log::warn!("sample_rate {} out of range, using {}", self.sample_rate, SAMPLE_RATE);
            self.sample_rate = SAMPLE_RATE;
        }
        if self.frame_count < 16 {
            log::warn!("frame_count {} too small, using 16", self.frame_count);
            self.frame_count = 16;
        }
        if self.fast_frame_count < 16 || self.fast_frame_count > self.frame_count {
            let clamped = self.fast_frame_count.clamp(16, self.frame_count);
            log::warn!("fast_frame_count {} adjusted to {}", self.fast_frame_count, clamped);
            self.fast_frame_count = clamped;
        }
        if self.fast_tracks < 2 || self.fast_tracks > MAX_FAST_TRACKS {
            let clamped = self.fast_tracks.clamp(2, MAX_FAST_TRACKS);
            log::warn!("fast_tracks {} adjusted to {}", self.fast_tracks, clamped);
            self.fast_tracks = clamped;
        }
        if self.mixer_slots == 0 {
            self.mixer_slots = 1;
        }
        if !(self.max_resample_ratio >= 1.0) {
            log::warn!("max_resample_ratio {} invalid, using 2.0", self.max_resample_ratio);
            self.max_resample_ratio = 2.0;
        }
        if self.pipe_depth_periods < 2 {
            self.pipe_depth_periods = 2;
        }
        if self.warmup.max_cycles < self.warmup.min_cycles {
            self.warmup.max_cycles = self.warmup.min_cycles;
        }
        if self.sink_formats.is_empty() {
            self.sink_formats = vec![SampleFormat::F32, SampleFormat::I16];
        }
        self
    }

    /// Ramp length for a mixer running `block_frames` per cycle
    pub fn ramp_frames(&self, block_frames: usize) -> usize {
        if self.volume_ramp_frames == 0 {
            block_frames
        } else {
            self.volume_ramp_frames
        }
    }

    /// Frames a fast track needs to count as full
    pub fn fast_full_frames(&self) -> usize {
        if self.underrun.full_frames == 0 {
            self.fast_frame_count
        } else {
            self.underrun.full_frames
        }
    }

    /// Normal→fast pipe fill level the control loop aims for
    pub fn pipe_setpoint_frames(&self) -> usize {
        match self.power_state {
            PowerState::Interactive => self.frame_count * 2,
            PowerState::LowPower => self.frame_count * self.pipe_depth_periods,
        }
    }

    /// Normal period as a duration
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_count as f64 / self.sample_rate as f64)
    }

    /// Fast period as a duration
    pub fn fast_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.fast_frame_count as f64 / self.sample_rate as f64)
    }
}
