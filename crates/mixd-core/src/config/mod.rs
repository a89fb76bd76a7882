//! Engine configuration
//!
//! - Generic YAML config loading/saving
//! - Default config location
//! - `EngineConfig`: every policy constant the engine uses (ramp length,
//!   retry budget, resample ratio cap, warm-up and underrun thresholds)
//!
//! # Usage
//!
//! ```ignore
//! use mixd_core::config::{load_config, default_config_path, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path("engine.yaml"));
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{
    EngineConfig, PowerState, ResamplerQuality, UnderrunPolicy, WarmupPolicy,
    DEFAULT_FAST_FRAME_COUNT, DEFAULT_FRAME_COUNT, MAX_FAST_TRACKS,
};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
