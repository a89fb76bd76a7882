//! Device output through CPAL
//!
//! CPAL drives its own callback thread, so the sink does not write to the
//! device directly. Frames go into a lock-free ring that the callback
//! drains; an empty ring plays silence. The stream object itself is kept
//! on a small owner thread because it is not `Send` on every host.
//!
//! ```text
//! fast path ──write()──► rtrb ring (StereoSample) ──► CPAL callback ──► device
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam::channel::{bounded, Sender};

use super::{OutputSink, SinkFormat, SinkTimestamp};
use crate::error::{SinkError, SinkResult};
use crate::types::{SampleFormat, StereoSample};

/// Ring capacity in device periods of 1024 frames
const RING_FRAMES: usize = 1024 * 4;

/// Default output device
pub struct CpalSink {
    name: String,
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    format: Option<SinkFormat>,
    producer: Option<rtrb::Producer<StereoSample>>,
    /// Frames the callback has handed to the device
    presented: Arc<AtomicU64>,
    written: u64,
    stream: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CpalSink {
    /// Open the host's default output device
    pub fn open_default() -> SinkResult<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| SinkError::Device("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SinkError::Device(e.to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!(
            "Output device: {} ({} channels, {}Hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );

        Ok(Self {
            name,
            device,
            config,
            format: None,
            producer: None,
            presented: Arc::new(AtomicU64::new(0)),
            written: 0,
            stream: None,
        })
    }

    /// Rate the device runs at
    pub fn device_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    fn start_stream(&mut self) -> SinkResult<()> {
        let (producer, consumer) = rtrb::RingBuffer::<StereoSample>::new(RING_FRAMES);
        let stream_config = StreamConfig {
            channels: self.config.channels(),
            sample_rate: self.config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let device = self.device.clone();
        let presented = Arc::clone(&self.presented);
        let (ready_tx, ready_rx) = bounded::<SinkResult<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let owner = thread::Builder::new()
            .name("mixd-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, &stream_config, consumer, presented) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SinkError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until the sink is dropped
                let _ = stop_rx.recv();
            })
            .map_err(|e| SinkError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.producer = Some(producer);
                self.stream = Some((stop_tx, owner));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = owner.join();
                Err(e)
            }
            Err(_) => {
                let _ = owner.join();
                Err(SinkError::Device("stream thread exited".to_string()))
            }
        }
    }
}

impl OutputSink for CpalSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn negotiate(&mut self, candidates: &[SinkFormat]) -> SinkResult<SinkFormat> {
        let rate = self.device_rate();
        let format = candidates
            .iter()
            .copied()
            .find(|candidate| {
                candidate.sample_rate == rate
                    && matches!(
                        candidate.sample_format,
                        SampleFormat::F32 | SampleFormat::I16
                    )
            })
            .ok_or(SinkError::NoCompatibleFormat)?;

        if self.stream.is_none() {
            self.start_stream()?;
        }
        self.format = Some(format);
        Ok(format)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        let format = self.format.ok_or(SinkError::NotNegotiated)?;
        let producer = self.producer.as_mut().ok_or(SinkError::NotNegotiated)?;
        let frame_size = format.frame_size();
        let frames = frames.min(data.len() / frame_size).min(producer.slots());

        for frame in data.chunks_exact(frame_size).take(frames) {
            let sample = match format.sample_format {
                SampleFormat::I16 => StereoSample::new(
                    i16::from_ne_bytes([frame[0], frame[1]]) as f32 / 32768.0,
                    i16::from_ne_bytes([frame[2], frame[3]]) as f32 / 32768.0,
                ),
                _ => StereoSample::new(
                    f32::from_ne_bytes([frame[0], frame[1], frame[2], frame[3]]),
                    f32::from_ne_bytes([frame[4], frame[5], frame[6], frame[7]]),
                ),
            };
            if producer.push(sample).is_err() {
                break;
            }
        }
        self.written += frames as u64;
        Ok(frames)
    }

    fn timestamp(&self) -> Option<SinkTimestamp> {
        self.format?;
        Some(SinkTimestamp {
            position: self.presented.load(Ordering::Acquire),
            time: Instant::now(),
        })
    }

    fn latency_frames(&self) -> u64 {
        self.written
            .saturating_sub(self.presented.load(Ordering::Acquire))
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some((stop, owner)) = self.stream.take() {
            let _ = stop.send(());
            let _ = owner.join();
        }
    }
}

/// Output stream draining the ring; plays silence when it runs dry
fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: rtrb::Consumer<StereoSample>,
    presented: Arc<AtomicU64>,
) -> SinkResult<Stream> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut played = 0u64;
                for frame in data.chunks_mut(channels) {
                    match consumer.pop() {
                        Ok(sample) => {
                            frame[0] = sample.left;
                            if channels > 1 {
                                frame[1] = sample.right;
                            }
                            for ch in frame.iter_mut().skip(2) {
                                *ch = 0.0;
                            }
                            played += 1;
                        }
                        Err(_) => {
                            for ch in frame.iter_mut() {
                                *ch = 0.0;
                            }
                        }
                    }
                }
                presented.fetch_add(played, Ordering::Release);
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SinkError::Device(e.to_string()))
}
