//! Sample container conversion stage

use super::{BufferProvider, CopyStage, CopyTransform};
use crate::convert;
use crate::types::{Sample, SampleFormat};

/// Converts interleaved `from` samples to float, channel count unchanged
#[derive(Debug, Clone, Copy)]
pub struct Reformat {
    from: SampleFormat,
    channels: usize,
}

impl CopyTransform for Reformat {
    fn output_channels(&self) -> usize {
        self.channels
    }

    fn transform(&mut self, src: &[u8], frames: usize, dst: &mut [Sample]) -> bool {
        let expected = frames * self.channels;
        convert::to_float(self.from, src, dst) == expected
    }
}

/// Reformatting stage
///
/// Always converts through its private buffer, even when the source and
/// float frame sizes match (i32 -> f32): the upstream buffer is a read-only
/// view of the client ring.
pub type Reformatter = CopyStage<Reformat>;

impl Reformatter {
    pub fn for_format(
        upstream: Box<dyn BufferProvider>,
        from: SampleFormat,
        channels: usize,
        max_frames: usize,
    ) -> Self {
        CopyStage::new(upstream, Reformat { from, channels }, max_frames)
    }

    pub fn source_format(&self) -> SampleFormat {
        self.transform().from
    }
}
