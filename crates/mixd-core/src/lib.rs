//! Mixd Core - real-time audio mixing engine
//!
//! Combines concurrently playing client tracks, each with its own sample
//! format, channel layout, rate and volume, into one stream for an output
//! sink. A normal-priority control loop owns track admission and
//! lifecycle; an optional hard real-time fast path mixes a small set of
//! low-latency tracks plus the control loop's mix in front of the sink.

pub mod config;
pub mod control;
pub mod convert;
pub mod engine;
pub mod error;
pub mod fast;
pub mod gain;
pub mod gc;
pub mod mixer;
pub mod priority;
pub mod provider;
pub mod resampler;
pub mod sink;
pub mod state_queue;
pub mod track;
pub mod types;

pub use config::EngineConfig;
pub use engine::MixingEngine;
pub use error::{MixerError, MixerResult, SinkError, SinkResult};
pub use track::{TrackHandle, TrackId, TrackOptions};
pub use types::*;
