use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{first_supported, OutputSink, Pacer, SinkFormat, SinkTimestamp};
use crate::error::{SinkError, SinkResult};
use crate::types::SampleFormat;

#[derive(Debug)]
struct CaptureState {
    data: Mutex<Vec<u8>>,
    frames: AtomicU64,
    writes: AtomicU64,
    /// Writes left to fail
    fail_writes: AtomicU32,
    /// Largest write accepted (0 = unlimited)
    max_write: AtomicUsize,
    format: Mutex<Option<SinkFormat>>,
}

/// Sink that records everything written to it
///
/// The recording is read through a [`CaptureHandle`], which also injects
/// write failures and partial writes.
pub struct CaptureSink {
    supported: Vec<SampleFormat>,
    format: Option<SinkFormat>,
    pacer: Option<Pacer>,
    state: Arc<CaptureState>,
}

impl CaptureSink {
    /// Accepting the given sample formats
    pub fn new(supported: &[SampleFormat]) -> (Self, CaptureHandle) {
        let state = Arc::new(CaptureState {
            data: Mutex::new(Vec::new()),
            frames: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            fail_writes: AtomicU32::new(0),
            max_write: AtomicUsize::new(0),
            format: Mutex::new(None),
        });
        (
            Self {
                supported: supported.to_vec(),
                format: None,
                pacer: None,
                state: Arc::clone(&state),
            },
            CaptureHandle { state },
        )
    }

    /// Block each write until real time catches up, like a device would
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::default());
        self
    }
}

impl OutputSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn negotiate(&mut self, candidates: &[SinkFormat]) -> SinkResult<SinkFormat> {
        let format =
            first_supported(candidates, &self.supported).ok_or(SinkError::NoCompatibleFormat)?;
        self.format = Some(format);
        if let Ok(mut shared) = self.state.format.lock() {
            *shared = Some(format);
        }
        Ok(format)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        let format = self.format.ok_or(SinkError::NotNegotiated)?;
        let pending = self.state.fail_writes.load(Ordering::Acquire);
        if pending > 0 {
            self.state.fail_writes.store(pending - 1, Ordering::Release);
            return Err(SinkError::WriteFailed("injected failure".to_string()));
        }

        let mut frames = frames.min(data.len() / format.frame_size());
        let limit = self.state.max_write.load(Ordering::Relaxed);
        if limit > 0 {
            frames = frames.min(limit);
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(self.state.frames.load(Ordering::Acquire), format.sample_rate);
        }
        let bytes = &data[..frames * format.frame_size()];
        match self.state.data.lock() {
            Ok(mut recorded) => recorded.extend_from_slice(bytes),
            Err(_) => return Err(SinkError::WriteFailed("capture poisoned".to_string())),
        }
        self.state.frames.fetch_add(frames as u64, Ordering::Release);
        self.state.writes.fetch_add(1, Ordering::Relaxed);
        Ok(frames)
    }

    fn timestamp(&self) -> Option<SinkTimestamp> {
        let format = self.format?;
        let written = self.state.frames.load(Ordering::Acquire);
        let now = Instant::now();
        let position = match &self.pacer {
            Some(pacer) => pacer.presented(written, format.sample_rate, now),
            None => written,
        };
        Some(SinkTimestamp { position, time: now })
    }

    fn standby(&mut self) {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
    }
}

/// Reader side of a [`CaptureSink`]
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    state: Arc<CaptureState>,
}

impl CaptureHandle {
    pub fn frames(&self) -> u64 {
        self.state.frames.load(Ordering::Acquire)
    }

    pub fn writes(&self) -> u64 {
        self.state.writes.load(Ordering::Relaxed)
    }

    pub fn format(&self) -> Option<SinkFormat> {
        self.state.format.lock().ok().and_then(|format| *format)
    }

    /// Raw bytes recorded so far
    pub fn bytes(&self) -> Vec<u8> {
        self.state
            .data
            .lock()
            .map(|data| data.clone())
            .unwrap_or_default()
    }

    /// Recorded audio as float samples (f32 and i16 captures)
    pub fn samples(&self) -> Vec<f32> {
        let bytes = self.bytes();
        match self.format().map(|f| f.sample_format) {
            Some(SampleFormat::F32) => bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Some(SampleFormat::I16) => bytes
                .chunks_exact(2)
                .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.state.fail_writes.store(count, Ordering::Release);
    }

    /// Accept at most `frames` per write (0 = unlimited)
    pub fn limit_writes(&self, frames: usize) {
        self.state.max_write.store(frames, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_and_limits() {
        let (mut sink, handle) = CaptureSink::new(&[SampleFormat::F32]);
        sink.negotiate(&[
            SinkFormat::new(SampleFormat::I16, 48000),
            SinkFormat::new(SampleFormat::F32, 48000),
        ])
        .unwrap();
        assert_eq!(handle.format().unwrap().sample_format, SampleFormat::F32);

        let data: Vec<u8> = [0.5f32, -0.5, 0.25, -0.25]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        handle.limit_writes(1);
        assert_eq!(sink.write(&data, 2).unwrap(), 1);
        assert_eq!(handle.samples(), vec![0.5, -0.5]);
        assert_eq!(sink.timestamp().unwrap().position, 1);
    }

    #[test]
    fn test_injected_failures() {
        let (mut sink, handle) = CaptureSink::new(&[SampleFormat::I16]);
        sink.negotiate(&[SinkFormat::new(SampleFormat::I16, 48000)])
            .unwrap();
        handle.fail_next_writes(2);
        assert!(sink.write(&[0; 4], 1).is_err());
        assert!(sink.write(&[0; 4], 1).is_err());
        assert_eq!(sink.write(&[0; 4], 1).unwrap(), 1);
        assert_eq!(handle.writes(), 1);
    }

    #[test]
    fn test_no_compatible_format() {
        let (mut sink, _handle) = CaptureSink::new(&[SampleFormat::U8]);
        assert_eq!(
            sink.negotiate(&[SinkFormat::new(SampleFormat::F32, 48000)]),
            Err(SinkError::NoCompatibleFormat)
        );
    }
}
