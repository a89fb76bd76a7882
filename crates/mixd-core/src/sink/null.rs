use std::time::Instant;

use super::{first_supported, OutputSink, Pacer, SinkFormat, SinkTimestamp};
use crate::error::{SinkError, SinkResult};
use crate::types::SampleFormat;

/// Sink that discards audio
///
/// When paced, each write blocks until the wall clock catches up with the
/// frames written so far, standing in for a device that consumes audio in
/// real time.
pub struct NullSink {
    pacer: Option<Pacer>,
    format: Option<SinkFormat>,
    written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            pacer: None,
            format: None,
            written: 0,
        }
    }

    /// Consume audio at the negotiated rate
    pub fn paced() -> Self {
        Self {
            pacer: Some(Pacer::default()),
            ..Self::new()
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    fn presented(&self, now: Instant) -> u64 {
        match (&self.pacer, self.format) {
            (Some(pacer), Some(format)) => pacer.presented(self.written, format.sample_rate, now),
            _ => self.written,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn negotiate(&mut self, candidates: &[SinkFormat]) -> SinkResult<SinkFormat> {
        let all = [
            SampleFormat::F32,
            SampleFormat::I32,
            SampleFormat::I16,
            SampleFormat::U8,
        ];
        let format = first_supported(candidates, &all).ok_or(SinkError::NoCompatibleFormat)?;
        self.format = Some(format);
        Ok(format)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        let format = self.format.ok_or(SinkError::NotNegotiated)?;
        let frames = frames.min(data.len() / format.frame_size());
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(self.written, format.sample_rate);
        }
        self.written += frames as u64;
        Ok(frames)
    }

    fn timestamp(&self) -> Option<SinkTimestamp> {
        self.format?;
        let now = Instant::now();
        Some(SinkTimestamp {
            position: self.presented(now),
            time: now,
        })
    }

    fn latency_frames(&self) -> u64 {
        self.written - self.presented(Instant::now())
    }

    fn standby(&mut self) {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_write_requires_negotiation() {
        let mut sink = NullSink::new();
        assert_eq!(sink.write(&[0; 8], 1), Err(SinkError::NotNegotiated));
    }

    #[test]
    fn test_unpaced_sink_presents_everything() {
        let mut sink = NullSink::new();
        let format = sink
            .negotiate(&[SinkFormat::new(SampleFormat::I16, 48000)])
            .unwrap();
        assert_eq!(format.frame_size(), 4);

        assert_eq!(sink.write(&[0; 40], 10).unwrap(), 10);
        assert_eq!(sink.write(&[0; 6], 10).unwrap(), 1);
        assert_eq!(sink.timestamp().unwrap().position, 11);
        assert_eq!(sink.latency_frames(), 0);
    }

    #[test]
    fn test_paced_sink_keeps_real_time() {
        let mut sink = NullSink::paced();
        sink.negotiate(&[SinkFormat::new(SampleFormat::F32, 48000)])
            .unwrap();
        let period = vec![0u8; 480 * 8];

        let start = Instant::now();
        for _ in 0..5 {
            sink.write(&period, 480).unwrap();
        }
        // Four full periods must have elapsed before the fifth write returns
        assert!(start.elapsed() >= Duration::from_millis(39));
    }
}
