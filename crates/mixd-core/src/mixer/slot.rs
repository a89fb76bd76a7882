use super::hooks::TrackHook;
use super::ramp::GainRamp;
use crate::provider::BufferProvider;
use crate::resampler::Resampler;

/// Counters a slot accumulates instead of failing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotDiagnostics {
    /// Frames mixed as silence because the provider had nothing
    pub silenced_frames: u64,
    /// Provider buffers that could not be read as float samples
    pub misaligned_buffers: u64,
    /// Cycles in which the provider came up short
    pub short_cycles: u64,
}

/// Per-track mixing state
///
/// A slot is mixed only when it is allocated, enabled and fully
/// configured: a known channel count and a provider. The resampler is
/// present exactly when the track rate differs from the engine rate.
pub(crate) struct TrackSlot {
    pub allocated: bool,
    pub enabled: bool,
    /// Channels at the chain head (0 = not configured)
    pub channels: usize,
    pub sample_rate: u32,
    pub provider: Option<Box<dyn BufferProvider>>,
    pub resampler: Option<Box<dyn Resampler>>,
    pub volume: GainRamp<2>,
    pub aux: GainRamp<1>,
    pub output: usize,
    pub hook: TrackHook,
    pub diagnostics: SlotDiagnostics,
}

impl TrackSlot {
    pub fn new() -> Self {
        Self {
            allocated: false,
            enabled: false,
            channels: 0,
            sample_rate: 0,
            provider: None,
            resampler: None,
            volume: GainRamp::new([1.0, 1.0]),
            aux: GainRamp::new([0.0]),
            output: 0,
            hook: TrackHook::Nop,
            diagnostics: SlotDiagnostics::default(),
        }
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.channels != 0 && self.provider.is_some()
    }

    #[inline]
    pub fn is_mixable(&self) -> bool {
        self.allocated && self.enabled && self.is_configured()
    }

    /// Volume and aux are both settled at zero
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.volume.is_silent() && self.aux.is_silent()
    }

    pub fn select_hook(&self) -> TrackHook {
        if self.resampler.is_some() {
            TrackHook::Resample
        } else if self.is_muted() {
            TrackHook::Nop
        } else if self.channels == 1 {
            TrackHook::NoResampleMono
        } else {
            TrackHook::NoResampleStereo
        }
    }

    /// Back to the unallocated state; returns the provider
    pub fn clear(&mut self) -> Option<Box<dyn BufferProvider>> {
        let provider = self.provider.take();
        *self = Self::new();
        provider
    }
}
