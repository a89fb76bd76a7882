use super::{BufferProvider, Downmixer, Reformatter, TrackSource};
use crate::error::{MixerError, MixerResult};
use crate::types::{SampleFormat, TrackFormat, MIXER_CHANNELS};

/// What a chain adapts from, and how much each stage may stage at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSpec {
    pub format: TrackFormat,
    /// Largest request the mixer will make (frames)
    pub max_frames: usize,
}

impl ChainSpec {
    pub fn new(format: TrackFormat, max_frames: usize) -> Self {
        Self { format, max_frames }
    }

    /// Channels at the chain head: mono stays mono, everything else is
    /// stereo
    pub fn output_channels(&self) -> usize {
        self.format.channel_count().min(MIXER_CHANNELS)
    }

    pub fn needs_reformat(&self) -> bool {
        self.format.sample_format != SampleFormat::F32
    }

    pub fn needs_downmix(&self) -> bool {
        self.format.channel_count() > MIXER_CHANNELS
    }
}

/// Stack the stages a track needs on top of its ring
///
/// Stages that would be identity conversions are left out, so a float
/// stereo track is mixed straight from its ring.
pub fn build_chain(source: TrackSource, spec: ChainSpec) -> MixerResult<Box<dyn BufferProvider>> {
    if !spec.format.channel_mask.is_valid() {
        return Err(MixerError::unsupported_mask(spec.format.channel_mask));
    }

    let mut head: Box<dyn BufferProvider> = Box::new(source);

    if spec.needs_reformat() {
        head = Box::new(Reformatter::for_format(
            head,
            spec.format.sample_format,
            spec.format.channel_count(),
            spec.max_frames,
        ));
    }

    if spec.needs_downmix() {
        head = Box::new(Downmixer::for_mask(
            head,
            spec.format.channel_mask,
            spec.max_frames,
        )?);
    }

    debug_assert_eq!(
        head.frame_size(),
        spec.output_channels() * std::mem::size_of::<f32>()
    );
    Ok(head)
}
