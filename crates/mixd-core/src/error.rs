//! Engine error types
//!
//! Only configuration problems surface as errors. Starvation, bad client
//! state and sink hiccups are absorbed on the mixing paths (silence,
//! retries, counters) and never reach a caller.

use thiserror::Error;

use crate::types::{ChannelMask, SampleFormat};

/// Errors returned by track admission and mixer reconfiguration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    /// Sample format the track path cannot convert from
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(SampleFormat),

    /// Channel layout the downmixer cannot place
    #[error("Unsupported channel mask: {0:#x}")]
    UnsupportedChannelMask(u32),

    /// Channel count the mixer cannot take from a chain head
    #[error("Invalid mixer input channel count: {0}")]
    InvalidChannelCount(usize),

    /// Track sample rate outside what the resampler accepts
    #[error("Invalid sample rate {rate}Hz (engine runs at {engine_rate}Hz)")]
    InvalidSampleRate { rate: u32, engine_rate: u32 },

    /// Mixer slot index outside the slot array
    #[error("Mixer slot {0} out of range")]
    SlotOutOfRange(usize),

    /// Output buffer index the mixer was not built with
    #[error("Output buffer {index} out of range ({count} outputs)")]
    OutputOutOfRange { index: usize, count: usize },

    /// Cycle size outside what the mixer's buffers hold
    #[error("Invalid frame count {frames} (max {max})")]
    InvalidFrameCount { frames: usize, max: usize },

    /// Every mixer slot is allocated
    #[error("No free mixer slot")]
    NoFreeSlot,

    /// Track id does not name a live track
    #[error("Unknown track {0}")]
    UnknownTrack(u32),

    /// A resampler for this rate pair could not be built
    #[error("Failed to build resampler: {0}")]
    ResamplerConstruction(String),

    /// The engine has been shut down
    #[error("Mixing engine is shut down")]
    EngineShutDown,

    /// An engine thread could not be started
    #[error("Failed to spawn {name} thread: {reason}")]
    ThreadSpawn { name: &'static str, reason: String },

    /// The output sink refused the engine's formats
    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),
}

impl MixerError {
    pub fn unsupported_mask(mask: ChannelMask) -> Self {
        MixerError::UnsupportedChannelMask(mask.0)
    }
}

/// Result type for mixer operations
pub type MixerResult<T> = Result<T, MixerError>;

/// Errors reported by output sinks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// None of the offered formats is acceptable
    #[error("Sink accepts none of the offered formats")]
    NoCompatibleFormat,

    /// Write issued before a format was negotiated
    #[error("Sink format has not been negotiated")]
    NotNegotiated,

    /// Transient write failure; the caller retries next cycle
    #[error("Sink write failed: {0}")]
    WriteFailed(String),

    /// Device could not be opened or configured
    #[error("Audio device error: {0}")]
    Device(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MixerError::unsupported_mask(ChannelMask(1 << 20));
        assert_eq!(err.to_string(), "Unsupported channel mask: 0x100000");

        let err = MixerError::InvalidSampleRate {
            rate: 200_000,
            engine_rate: 48000,
        };
        assert!(err.to_string().contains("200000Hz"));
    }
}
