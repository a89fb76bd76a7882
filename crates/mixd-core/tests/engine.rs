//! End-to-end runs of the engine against a real-time paced capture sink

use std::thread;
use std::time::{Duration, Instant};

use mixd_core::sink::{CaptureHandle, CaptureSink};
use mixd_core::track::TRACK_DISABLED;
use mixd_core::{EngineConfig, MixerError, MixingEngine, SampleFormat, TrackFormat, TrackOptions};

const TIMEOUT: Duration = Duration::from_secs(10);

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn config(fast_path: bool) -> EngineConfig {
    EngineConfig {
        frame_count: 480,
        fast_frame_count: 120,
        fast_path,
        max_track_retries: 3,
        sink_formats: vec![SampleFormat::F32],
        ..EngineConfig::default()
    }
}

fn engine(fast_path: bool) -> (MixingEngine, CaptureHandle) {
    let (sink, capture) = CaptureSink::new(&[SampleFormat::F32]);
    let engine = MixingEngine::start(config(fast_path), Box::new(sink.paced())).unwrap();
    (engine, capture)
}

fn contains_level(capture: &CaptureHandle, level: f32) -> bool {
    contains_near(capture, level, 1e-4)
}

fn contains_near(capture: &CaptureHandle, level: f32, tolerance: f32) -> bool {
    capture.samples().iter().any(|&s| (s - level).abs() < tolerance)
}

#[test]
fn test_normal_track_reaches_sink() {
    let (mut engine, capture) = engine(false);
    let mut track = engine
        .create_track(
            TrackFormat::stereo_f32(48000),
            TrackOptions {
                buffer_frames: 9600,
                ..TrackOptions::default()
            },
        )
        .unwrap();
    assert!(!track.is_fast());

    assert_eq!(track.write_samples(&vec![0.25; 4800 * 2]).unwrap(), 4800);
    track.start().unwrap();

    assert!(wait_for(|| track.status().frames_released >= 4800));
    assert!(wait_for(|| contains_level(&capture, 0.25)));
    assert!(engine.stats().control.cycles > 0);
    assert!(engine.stats().fast.is_none());

    assert!(engine.shutdown().is_some());
    assert!(engine.shutdown().is_none());
}

#[test]
fn test_resampled_track_plays_at_engine_rate() {
    let (mut engine, capture) = engine(false);
    let mut track = engine
        .create_track(
            TrackFormat::stereo_f32(44100),
            TrackOptions {
                buffer_frames: 8820,
                ..TrackOptions::default()
            },
        )
        .unwrap();
    track.write_samples(&vec![0.25; 4410 * 2]).unwrap();
    track.start().unwrap();

    assert!(wait_for(|| track.status().frames_released >= 4000));
    assert!(wait_for(|| contains_near(&capture, 0.25, 0.01)));
    engine.shutdown();
}

#[test]
fn test_fast_track_mixes_alongside_pipe() {
    let (mut engine, capture) = engine(true);
    let mut fast = engine
        .create_track(
            TrackFormat::stereo_f32(48000),
            TrackOptions {
                fast: true,
                buffer_frames: 9600,
                ..TrackOptions::default()
            },
        )
        .unwrap();
    assert!(fast.is_fast());

    fast.write_samples(&vec![0.5; 4800 * 2]).unwrap();
    fast.start().unwrap();

    assert!(wait_for(|| fast.status().frames_released >= 4800));
    assert!(wait_for(|| fast.status().timestamp.frames > 0));
    assert!(wait_for(|| contains_level(&capture, 0.5)));

    let stats = engine.stats().fast.unwrap();
    assert!(stats.cycles > 0);
    assert!(stats.frames_written > 0);

    fast.stop().unwrap();
    assert!(engine.shutdown().is_some());
}

#[test]
fn test_fast_request_at_other_rate_falls_back() {
    let (mut engine, _capture) = engine(true);
    let track = engine
        .create_track(
            TrackFormat::stereo_f32(44100),
            TrackOptions {
                fast: true,
                ..TrackOptions::default()
            },
        )
        .unwrap();
    assert!(!track.is_fast());
    engine.shutdown();
}

#[test]
fn test_starved_track_disabled_then_restarted_by_write() {
    let (mut engine, _capture) = engine(false);
    let mut track = engine
        .create_track(TrackFormat::stereo_f32(48000), TrackOptions::default())
        .unwrap();
    track.write_samples(&vec![0.1; 480 * 2]).unwrap();
    track.start().unwrap();

    assert!(wait_for(|| track.status().flags & TRACK_DISABLED != 0));
    assert!(track.status().underruns > 3);
    assert_eq!(engine.stats().control.disabled, 1);

    track.write_samples(&vec![0.1; 480 * 2]).unwrap();
    assert_eq!(track.status().flags & TRACK_DISABLED, 0);
    engine.shutdown();
}

#[test]
fn test_invalid_format_and_shutdown_errors() {
    let (mut engine, _capture) = engine(false);
    let result = engine.create_track(TrackFormat::stereo_f32(200_000), TrackOptions::default());
    assert!(matches!(result, Err(MixerError::InvalidSampleRate { .. })));

    let track = engine
        .create_track(TrackFormat::stereo_f32(48000), TrackOptions::default())
        .unwrap();
    engine.shutdown();

    assert!(matches!(track.start(), Err(MixerError::EngineShutDown)));
    assert!(matches!(
        engine.create_track(TrackFormat::stereo_f32(48000), TrackOptions::default()),
        Err(MixerError::EngineShutDown)
    ));
}

#[test]
fn test_engine_idles_into_standby() {
    let (sink, _capture) = CaptureSink::new(&[SampleFormat::F32]);
    let config = EngineConfig {
        standby_delay_ms: 50,
        ..config(true)
    };
    let mut engine = MixingEngine::start(config, Box::new(sink.paced())).unwrap();
    let mut track = engine
        .create_track(TrackFormat::stereo_f32(48000), TrackOptions::default())
        .unwrap();
    track.write_samples(&vec![0.1; 960 * 2]).unwrap();
    track.start().unwrap();
    assert!(wait_for(|| !engine.stats().control.standby));

    track.pause().unwrap();
    assert!(wait_for(|| engine.stats().control.standby));
    engine.shutdown();
}

#[test]
fn test_stopped_fast_track_lets_engine_idle() {
    let (sink, _capture) = CaptureSink::new(&[SampleFormat::F32]);
    let config = EngineConfig {
        standby_delay_ms: 50,
        ..config(true)
    };
    let mut engine = MixingEngine::start(config, Box::new(sink.paced())).unwrap();
    let mut track = engine
        .create_track(
            TrackFormat::stereo_f32(48000),
            TrackOptions {
                fast: true,
                buffer_frames: 4096,
                ..TrackOptions::default()
            },
        )
        .unwrap();
    assert!(track.is_fast());
    track.write_samples(&vec![0.5; 2048 * 2]).unwrap();
    track.start().unwrap();
    assert!(wait_for(|| track.status().frames_released > 0));

    track.stop().unwrap();
    assert!(wait_for(|| track.status().frames_released == 2048));
    assert!(wait_for(|| track.status().timestamp.frames >= 2048));
    assert!(wait_for(|| engine.stats().control.standby));
    assert_eq!(track.status().flags & TRACK_DISABLED, 0);
    engine.shutdown();
}
