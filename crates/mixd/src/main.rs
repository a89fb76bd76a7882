//! mixd - mixing service daemon
//!
//! Starts the engine against an output sink, plays a handful of test tones
//! from client threads and reports engine statistics once a second.
//!
//! ## Command line flags
//!
//! - `--config <path>`: engine config (YAML), default `<config dir>/mixd/engine.yaml`
//! - `--seconds <n>`: how long to run (default 10)
//! - `--fast`: request fast-path slots for the tones
//!
//! Without the `cpal-sink` feature audio goes to a null sink that consumes
//! it in real time.

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use mixd_core::config::{default_config_path, load_config};
use mixd_core::sink::OutputSink;
use mixd_core::{EngineConfig, MixingEngine, TrackFormat, TrackHandle, TrackOptions};

/// Test tones: (frequency, sample rate, gain)
const TONES: [(f32, u32, f32); 3] = [(220.0, 48000, 0.2), (330.0, 44100, 0.15), (440.0, 48000, 0.1)];

/// Frames a tone thread writes at a time
const CHUNK_FRAMES: usize = 256;

struct Args {
    config: Option<PathBuf>,
    seconds: u64,
    fast: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            config: None,
            seconds: 10,
            fast: false,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().context("--config needs a path")?;
                    args.config = Some(PathBuf::from(path));
                }
                "--seconds" => {
                    let value = iter.next().context("--seconds needs a value")?;
                    args.seconds = value.parse().with_context(|| format!("invalid --seconds '{}'", value))?;
                }
                "--fast" => args.fast = true,
                other => bail!("unknown argument '{}'", other),
            }
        }
        Ok(args)
    }
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for lifecycle transitions
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path("engine.yaml"));
    let mut config: EngineConfig = load_config(&config_path);

    let sink = open_sink(&mut config)?;
    let mut engine = MixingEngine::start(config, sink).context("Failed to start mixing engine")?;

    let running = Arc::new(AtomicBool::new(true));
    let mut players = Vec::new();
    for (index, &(frequency, rate, gain)) in TONES.iter().enumerate() {
        let options = TrackOptions {
            fast: args.fast && rate == engine.config().sample_rate,
            ..TrackOptions::default()
        };
        let track = engine
            .create_track(TrackFormat::stereo_f32(rate), options)
            .with_context(|| format!("Failed to create tone track {}", index))?;
        log::info!(
            "{}: {}Hz tone at {}Hz{}",
            track.id(),
            frequency,
            rate,
            if track.is_fast() { " (fast)" } else { "" }
        );
        players.push(spawn_tone(index, track, frequency, gain, Arc::clone(&running))?);
    }

    for _ in 0..args.seconds {
        thread::sleep(Duration::from_secs(1));
        report(&engine);
    }

    running.store(false, Ordering::Relaxed);
    for player in players {
        if player.join().is_err() {
            log::error!("Tone thread panicked");
        }
    }
    engine.shutdown();
    Ok(())
}

#[cfg(feature = "cpal-sink")]
fn open_sink(config: &mut EngineConfig) -> Result<Box<dyn OutputSink>> {
    let sink = mixd_core::sink::CpalSink::open_default().context("Failed to open audio device")?;
    config.sample_rate = sink.device_rate();
    Ok(Box::new(sink))
}

#[cfg(not(feature = "cpal-sink"))]
fn open_sink(_config: &mut EngineConfig) -> Result<Box<dyn OutputSink>> {
    log::info!("Built without cpal-sink; playing into a paced null sink");
    Ok(Box::new(mixd_core::sink::NullSink::paced()))
}

/// Feed a sine wave to `track` until `running` clears
fn spawn_tone(
    index: usize,
    mut track: TrackHandle,
    frequency: f32,
    gain: f32,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("mixd-tone-{}", index))
        .spawn(move || {
            let rate = track.format().sample_rate as f32;
            let step = TAU * frequency / rate;
            let mut phase = 0.0f32;
            let mut chunk = vec![0.0f32; CHUNK_FRAMES * 2];
            let mut started = false;

            while running.load(Ordering::Relaxed) {
                if track.frames_writable() < CHUNK_FRAMES {
                    thread::sleep(Duration::from_millis(2));
                    continue;
                }
                for frame in chunk.chunks_exact_mut(2) {
                    let sample = phase.sin() * gain;
                    frame[0] = sample;
                    frame[1] = sample;
                    phase = (phase + step) % TAU;
                }
                if track.write_samples(&chunk).is_err() {
                    break;
                }
                if !started {
                    if let Err(e) = track.start() {
                        log::warn!("{}: start failed: {}", track.id(), e);
                        break;
                    }
                    started = true;
                }
            }
            let _ = track.stop();
            let status = track.status();
            log::info!(
                "{} done: {} frames written, {} underruns",
                track.id(),
                status.frames_written,
                status.underruns
            );
        })
        .context("Failed to spawn tone thread")?;
    Ok(handle)
}

fn report(engine: &MixingEngine) {
    let stats = engine.stats();
    let control = stats.control;
    log::info!(
        "control: {} cycles, {} short, {}/{} tracks mixing, {} disabled{}",
        control.cycles,
        control.short_writes,
        control.mixing,
        control.tracks,
        control.disabled,
        if control.standby { ", standby" } else { "" }
    );
    if let Some(fast) = stats.fast {
        log::info!(
            "fast: {} cycles ({}), {:?}/{:?}/{:?} min/mean/max, {} overruns, {} frames presented",
            fast.cycles,
            if fast.warmed_up { "warm" } else { "warming up" },
            fast.cycle_min,
            fast.cycle_mean,
            fast.cycle_max,
            fast.overruns,
            fast.frames_presented
        );
    }
}
