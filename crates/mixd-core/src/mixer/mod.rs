//! Mixing engine
//!
//! [`AudioMixer`] owns a fixed array of track slots and a set of output
//! buffers (output 0 is the main mix; the others feed effect chains). Work
//! is split in two phases:
//!
//! - **Validate** runs only after something changed: the enabled set, a
//!   slot's format or rate, a volume target, a finished ramp. It picks a
//!   [`TrackHook`] per slot and a [`ProcessHook`] for the cycle, and groups
//!   mixed slots by output.
//! - **Process** runs every cycle and executes the selected hooks for
//!   `frame_count` frames. Nothing on this path allocates; all buffers are
//!   sized when the mixer is built.
//!
//! Output is left unclamped; conversion to the sink format clamps.

mod hooks;
mod ramp;
mod slot;

pub use hooks::{ProcessHook, TrackHook};
pub use ramp::GainRamp;
pub use slot::SlotDiagnostics;

use hooks::{apply_gain, stereo_frames};
use slot::TrackSlot;

use crate::config::{EngineConfig, ResamplerQuality};
use crate::error::{MixerError, MixerResult};
use crate::gain::{sanitize_gain, StereoGain};
use crate::provider::BufferProvider;
use crate::resampler::create_resampler;
use crate::types::{Sample, StereoBuffer, StereoSample};

/// Shape of a mixer, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerSettings {
    pub sample_rate: u32,
    /// Largest (and initial) frames per cycle
    pub frame_count: usize,
    pub slots: usize,
    pub outputs: usize,
    /// Volume ramp length in frames (0 = one processing block)
    pub ramp_frames: usize,
    pub quality: ResamplerQuality,
    pub max_resample_ratio: f64,
}

impl MixerSettings {
    /// Normal-path mixer for `outputs` output buffers
    pub fn normal(config: &EngineConfig, outputs: usize) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_count: config.frame_count,
            slots: config.mixer_slots,
            outputs,
            ramp_frames: config.volume_ramp_frames,
            quality: config.resampler_quality,
            max_resample_ratio: config.max_resample_ratio,
        }
    }

    /// Fast-path mixer: one slot per fast track, one output
    pub fn fast(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_count: config.fast_frame_count,
            slots: config.fast_tracks,
            outputs: 1,
            ramp_frames: config.volume_ramp_frames,
            quality: config.resampler_quality,
            max_resample_ratio: config.max_resample_ratio,
        }
    }
}

/// Multi-track mixer with per-track dispatch
pub struct AudioMixer {
    settings: MixerSettings,
    frame_count: usize,
    slots: Vec<TrackSlot>,
    outputs: Vec<StereoBuffer>,
    aux: Vec<Sample>,
    /// Slots mixed this cycle, in slot order
    active: Vec<usize>,
    /// `active` split by output buffer
    groups: Vec<Vec<usize>>,
    process_hook: ProcessHook,
    needs_validate: bool,
    scratch: Vec<StereoSample>,
}

impl AudioMixer {
    pub fn new(settings: MixerSettings) -> Self {
        let frames = settings.frame_count.max(1);
        let outputs = settings.outputs.max(1);
        Self {
            settings: MixerSettings {
                frame_count: frames,
                outputs,
                ..settings
            },
            frame_count: frames,
            slots: (0..settings.slots).map(|_| TrackSlot::new()).collect(),
            outputs: (0..outputs).map(|_| StereoBuffer::silence(frames)).collect(),
            aux: vec![0.0; frames],
            active: Vec::with_capacity(settings.slots),
            groups: (0..outputs)
                .map(|_| Vec::with_capacity(settings.slots))
                .collect(),
            process_hook: ProcessHook::NoTracks,
            needs_validate: false,
            scratch: vec![StereoSample::silence(); frames],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Frames per cycle, up to the size the mixer was built with
    pub fn set_frame_count(&mut self, frames: usize) -> MixerResult<()> {
        if frames == 0 || frames > self.settings.frame_count {
            return Err(MixerError::InvalidFrameCount {
                frames,
                max: self.settings.frame_count,
            });
        }
        self.frame_count = frames;
        for output in &mut self.outputs {
            output.set_len_from_capacity(frames);
        }
        Ok(())
    }

    fn ramp_frames(&self) -> usize {
        if self.settings.ramp_frames == 0 {
            self.frame_count
        } else {
            self.settings.ramp_frames
        }
    }

    fn slot(&self, index: usize) -> MixerResult<&TrackSlot> {
        self.slots
            .get(index)
            .filter(|slot| slot.allocated)
            .ok_or(MixerError::SlotOutOfRange(index))
    }

    fn slot_mut(&mut self, index: usize) -> MixerResult<&mut TrackSlot> {
        self.slots
            .get_mut(index)
            .filter(|slot| slot.allocated)
            .ok_or(MixerError::SlotOutOfRange(index))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Slot lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Claim the lowest free slot
    pub fn allocate(&mut self) -> MixerResult<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.allocated)
            .ok_or(MixerError::NoFreeSlot)?;
        self.allocate_at(index)?;
        Ok(index)
    }

    /// Claim a specific slot (the fast path's slots are numbered by the
    /// control loop)
    pub fn allocate_at(&mut self, index: usize) -> MixerResult<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(MixerError::SlotOutOfRange(index))?;
        slot.clear();
        slot.allocated = true;
        Ok(())
    }

    /// Free a slot, handing back its provider
    pub fn release(&mut self, index: usize) -> MixerResult<Option<Box<dyn BufferProvider>>> {
        let provider = self.slot_mut(index)?.clear();
        self.needs_validate = true;
        Ok(provider)
    }

    pub fn is_allocated(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.allocated)
    }

    pub fn enable(&mut self, index: usize) -> MixerResult<()> {
        let slot = self.slot_mut(index)?;
        if !slot.enabled {
            slot.enabled = true;
            self.needs_validate = true;
        }
        Ok(())
    }

    pub fn disable(&mut self, index: usize) -> MixerResult<()> {
        let slot = self.slot_mut(index)?;
        if slot.enabled {
            slot.enabled = false;
            self.needs_validate = true;
        }
        Ok(())
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.slot(index).is_ok_and(|slot| slot.enabled)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Slot parameters
    // ─────────────────────────────────────────────────────────────────────

    /// Install a chain head, returning the previous one
    pub fn set_buffer_provider(
        &mut self,
        index: usize,
        provider: Option<Box<dyn BufferProvider>>,
    ) -> MixerResult<Option<Box<dyn BufferProvider>>> {
        let slot = self.slot_mut(index)?;
        let previous = std::mem::replace(&mut slot.provider, provider);
        if let Some(resampler) = slot.resampler.as_mut() {
            resampler.reset();
        }
        self.needs_validate = true;
        Ok(previous)
    }

    /// The slot's chain head, e.g. to flush it
    pub fn buffer_provider_mut(&mut self, index: usize) -> Option<&mut (dyn BufferProvider + 'static)> {
        self.slots
            .get_mut(index)
            .filter(|slot| slot.allocated)
            .and_then(|slot| slot.provider.as_deref_mut())
    }

    /// Set the chain head's channel count (1 or 2) and the track rate
    ///
    /// The rate is capped at `max_resample_ratio` times the engine rate. A
    /// rate other than the engine's builds or retunes the slot's
    /// resampler; if that fails the slot is left unconfigured and is not
    /// mixed.
    pub fn set_format(&mut self, index: usize, channels: usize, sample_rate: u32) -> MixerResult<()> {
        if !(1..=2).contains(&channels) {
            return Err(MixerError::InvalidChannelCount(channels));
        }
        if sample_rate == 0 {
            return Err(MixerError::InvalidSampleRate {
                rate: sample_rate,
                engine_rate: self.settings.sample_rate,
            });
        }
        let engine_rate = self.settings.sample_rate;
        let max_rate = (engine_rate as f64 * self.settings.max_resample_ratio) as u32;
        let rate = sample_rate.min(max_rate.max(1));
        let quality = self.settings.quality;
        let block = self.settings.frame_count;

        let slot = self.slot_mut(index)?;
        if slot.channels == channels && slot.sample_rate == rate {
            return Ok(());
        }

        let result = if rate == engine_rate {
            slot.resampler = None;
            Ok(())
        } else {
            let retuned = slot.channels == channels
                && slot
                    .resampler
                    .as_mut()
                    .is_some_and(|resampler| resampler.set_input_rate(rate));
            if retuned {
                Ok(())
            } else {
                create_resampler(quality, channels, rate, engine_rate, block)
                    .map(|resampler| slot.resampler = Some(resampler))
            }
        };
        match result {
            Ok(()) => {
                slot.channels = channels;
                slot.sample_rate = rate;
            }
            Err(_) => {
                slot.channels = 0;
                slot.resampler = None;
            }
        }
        self.needs_validate = true;
        result
    }

    /// Track rate after capping (0 = not configured)
    pub fn sample_rate_of(&self, index: usize) -> u32 {
        self.slot(index).map_or(0, |slot| slot.sample_rate)
    }

    /// Set the volume target, ramping over one block when `ramp` is set
    ///
    /// An unchanged target does nothing, so this can be called every cycle.
    pub fn set_volume(&mut self, index: usize, gain: StereoGain, ramp: bool) -> MixerResult<()> {
        let frames = if ramp { self.ramp_frames() } else { 0 };
        let gain = gain.sanitized();
        let slot = self.slot_mut(index)?;
        if slot.volume.set_target([gain.left, gain.right], frames) {
            self.needs_validate = true;
        }
        Ok(())
    }

    pub fn set_aux_level(&mut self, index: usize, level: f32, ramp: bool) -> MixerResult<()> {
        let frames = if ramp { self.ramp_frames() } else { 0 };
        let slot = self.slot_mut(index)?;
        if slot.aux.set_target([sanitize_gain(level)], frames) {
            self.needs_validate = true;
        }
        Ok(())
    }

    /// Route a slot to an output buffer
    pub fn set_output(&mut self, index: usize, output: usize) -> MixerResult<()> {
        let count = self.outputs.len();
        if output >= count {
            return Err(MixerError::OutputOutOfRange {
                index: output,
                count,
            });
        }
        let slot = self.slot_mut(index)?;
        if slot.output != output {
            slot.output = output;
            self.needs_validate = true;
        }
        Ok(())
    }

    /// Gain that will be applied to the slot's next frame
    pub fn volume(&self, index: usize) -> Option<StereoGain> {
        self.slot(index).ok().map(|slot| {
            let [left, right] = slot.volume.current();
            StereoGain::new(left, right)
        })
    }

    pub fn is_ramping(&self, index: usize) -> bool {
        self.slot(index)
            .is_ok_and(|slot| slot.volume.is_ramping() || slot.aux.is_ramping())
    }

    /// Frames the slot's chain head can supply right now
    pub fn frames_ready(&self, index: usize) -> usize {
        self.slot(index)
            .ok()
            .and_then(|slot| slot.provider.as_ref())
            .map_or(0, |provider| provider.frames_ready())
    }

    pub fn diagnostics(&self, index: usize) -> SlotDiagnostics {
        self.slot(index).map_or(SlotDiagnostics::default(), |slot| {
            let mut diagnostics = slot.diagnostics;
            if let Some(resampler) = &slot.resampler {
                diagnostics.misaligned_buffers += resampler.misaligned_buffers();
            }
            if let Some(provider) = &slot.provider {
                diagnostics.silenced_frames += provider.silenced_frames();
            }
            diagnostics
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validate
    // ─────────────────────────────────────────────────────────────────────

    /// Force a validate pass on the next cycle
    pub fn invalidate(&mut self) {
        self.needs_validate = true;
    }

    /// Recompute hooks and output groups
    pub fn validate(&mut self) {
        self.active.clear();
        for group in &mut self.groups {
            group.clear();
        }

        let mut resampling = false;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_mixable() {
                slot.hook = TrackHook::Nop;
                continue;
            }
            slot.hook = slot.select_hook();
            resampling |= slot.hook == TrackHook::Resample;
            self.active.push(index);
            self.groups[slot.output].push(index);
        }

        self.process_hook = match self.active.as_slice() {
            [] => ProcessHook::NoTracks,
            [only] if self.is_simple(*only) => ProcessHook::OneTrackNoResampling,
            _ if resampling => ProcessHook::GenericResampling,
            _ => ProcessHook::GenericNoResampling,
        };
        self.needs_validate = false;
    }

    fn is_simple(&self, index: usize) -> bool {
        let slot = &self.slots[index];
        matches!(
            slot.hook,
            TrackHook::NoResampleMono | TrackHook::NoResampleStereo
        ) && slot.aux.is_silent()
    }

    /// Slots the last validate pass selected for mixing
    pub fn mixed_tracks(&self) -> &[usize] {
        &self.active
    }

    pub fn process_hook(&self) -> ProcessHook {
        self.process_hook
    }

    pub fn track_hook(&self, index: usize) -> Option<TrackHook> {
        self.slot(index).ok().map(|slot| slot.hook)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Process
    // ─────────────────────────────────────────────────────────────────────

    /// Mix one cycle of `frame_count` frames into the output buffers
    pub fn process(&mut self) {
        if self.needs_validate {
            self.validate();
        }
        let frames = self.frame_count;
        self.aux[..frames].fill(0.0);

        let ramp_finished = match self.process_hook {
            ProcessHook::NoTracks => {
                for output in &mut self.outputs {
                    output.fill_silence();
                }
                false
            }
            ProcessHook::OneTrackNoResampling => self.process_one_track(frames),
            ProcessHook::GenericNoResampling | ProcessHook::GenericResampling => {
                self.process_generic(frames)
            }
        };

        if ramp_finished {
            self.needs_validate = true;
        }
    }

    fn process_one_track(&mut self, frames: usize) -> bool {
        let index = self.active[0];
        let Self {
            slots, outputs, ..
        } = self;
        let slot = &mut slots[index];
        for (i, output) in outputs.iter_mut().enumerate() {
            if i != slot.output {
                output.fill_silence();
            }
        }
        let out = &mut outputs[slot.output].as_mut_slice()[..frames];
        mix_direct::<false>(slot, out, None)
    }

    fn process_generic(&mut self, frames: usize) -> bool {
        let Self {
            slots,
            outputs,
            groups,
            aux,
            scratch,
            ..
        } = self;

        let mut ramp_finished = false;
        for (output, group) in outputs.iter_mut().zip(groups.iter()) {
            output.fill_silence();
            let out = &mut output.as_mut_slice()[..frames];
            for &index in group {
                let slot = &mut slots[index];
                let send = (!slot.aux.is_silent()).then_some(&mut aux[..frames]);
                ramp_finished |= match slot.hook {
                    TrackHook::Nop => {
                        consume(slot, frames);
                        false
                    }
                    TrackHook::NoResampleMono | TrackHook::NoResampleStereo => {
                        mix_direct::<true>(slot, out, send)
                    }
                    TrackHook::Resample => mix_resampled(slot, out, send, &mut scratch[..frames]),
                };
            }
        }
        ramp_finished
    }

    // ─────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────

    /// Mixed frames of one output, `frame_count` long
    pub fn output(&self, index: usize) -> &StereoBuffer {
        &self.outputs[index.min(self.outputs.len() - 1)]
    }

    /// Mutable access so an effect chain can process an output in place
    pub fn output_mut(&mut self, index: usize) -> Option<&mut StereoBuffer> {
        self.outputs.get_mut(index)
    }

    /// Output 0 plus every other output summed in (after their effects ran)
    pub fn fold_outputs(&mut self) {
        let (main, rest) = self.outputs.split_at_mut(1);
        for output in rest.iter() {
            main[0].add_buffer(output);
        }
    }

    /// Mono aux send bus for the last cycle
    pub fn aux_output(&self) -> &[Sample] {
        &self.aux[..self.frame_count]
    }

    pub fn aux_output_mut(&mut self) -> &mut [Sample] {
        &mut self.aux[..self.frame_count]
    }
}

/// Pull and release input without mixing it
fn consume(slot: &mut TrackSlot, frames: usize) {
    let Some(provider) = slot.provider.as_mut() else {
        return;
    };
    let mut done = 0;
    while done < frames {
        let got = provider.get_next_buffer(frames - done).frames;
        if got == 0 {
            break;
        }
        provider.release_buffer(got);
        done += got;
    }
}

/// Mix a slot at the engine rate straight from its provider
///
/// Frames the provider cannot supply are mixed as silence and counted.
fn mix_direct<const ACCUMULATE: bool>(
    slot: &mut TrackSlot,
    out: &mut [StereoSample],
    mut aux: Option<&mut [Sample]>,
) -> bool {
    let TrackSlot {
        provider,
        channels,
        volume,
        aux: aux_level,
        diagnostics,
        ..
    } = slot;
    let Some(provider) = provider.as_mut() else {
        return false;
    };

    let frames = out.len();
    let mut done = 0;
    let mut ramp_finished = false;
    while done < frames {
        let buffer = provider.get_next_buffer(frames - done);
        let got = buffer.frames;
        if got == 0 {
            break;
        }
        let span = done..done + got;
        match buffer.samples() {
            Some(samples) => {
                let aux_span = aux.as_deref_mut().map(|aux| &mut aux[span.clone()]);
                ramp_finished |= apply_gain::<ACCUMULATE>(
                    stereo_frames(&samples[..got * *channels], *channels),
                    &mut out[span],
                    aux_span,
                    volume,
                    aux_level,
                );
            }
            None => {
                diagnostics.misaligned_buffers += 1;
                diagnostics.silenced_frames += got as u64;
                if !ACCUMULATE {
                    out[span].fill(StereoSample::silence());
                }
                ramp_finished |= volume.advance_by(got);
                ramp_finished |= aux_level.advance_by(got);
            }
        }
        provider.release_buffer(got);
        done += got;
    }

    if done < frames {
        let missing = frames - done;
        diagnostics.silenced_frames += missing as u64;
        diagnostics.short_cycles += 1;
        if !ACCUMULATE {
            out[done..].fill(StereoSample::silence());
        }
        ramp_finished |= volume.advance_by(missing);
        ramp_finished |= aux_level.advance_by(missing);
    }
    ramp_finished
}

/// Mix a slot through its resampler, then apply gain
fn mix_resampled(
    slot: &mut TrackSlot,
    out: &mut [StereoSample],
    aux: Option<&mut [Sample]>,
    scratch: &mut [StereoSample],
) -> bool {
    let TrackSlot {
        provider,
        resampler,
        volume,
        aux: aux_level,
        diagnostics,
        ..
    } = slot;
    let (Some(provider), Some(resampler)) = (provider.as_mut(), resampler.as_mut()) else {
        return false;
    };

    let produced = resampler.resample(scratch, &mut **provider);
    if produced < scratch.len() {
        scratch[produced..].fill(StereoSample::silence());
        diagnostics.silenced_frames += (scratch.len() - produced) as u64;
        diagnostics.short_cycles += 1;
    }
    apply_gain::<true>(scratch.iter().copied(), out, aux, volume, aux_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::VecProvider;

    fn settings(frames: usize) -> MixerSettings {
        MixerSettings {
            sample_rate: 48000,
            frame_count: frames,
            slots: 8,
            outputs: 2,
            ramp_frames: 0,
            quality: ResamplerQuality::Linear,
            max_resample_ratio: 2.0,
        }
    }

    fn add_track(mixer: &mut AudioMixer, samples: Vec<f32>, channels: usize, rate: u32) -> usize {
        let slot = mixer.allocate().unwrap();
        mixer
            .set_buffer_provider(slot, Some(Box::new(VecProvider::new(samples, channels))))
            .unwrap();
        mixer.set_format(slot, channels, rate).unwrap();
        mixer.enable(slot).unwrap();
        slot
    }

    #[test]
    fn test_two_unity_tracks_sum_unclamped() {
        let mut mixer = AudioMixer::new(settings(1));
        add_track(&mut mixer, vec![100.0, -100.0], 2, 48000);
        add_track(&mut mixer, vec![50.0, 50.0], 2, 48000);

        mixer.process();
        assert_eq!(mixer.process_hook(), ProcessHook::GenericNoResampling);
        assert_eq!(mixer.output(0)[0], StereoSample::new(150.0, -50.0));
    }

    #[test]
    fn test_one_track_path_overwrites_stale_output() {
        let mut mixer = AudioMixer::new(settings(2));
        let a = add_track(&mut mixer, vec![1.0; 4], 2, 48000);
        let b = add_track(&mut mixer, vec![1.0; 4], 2, 48000);
        mixer.process();
        assert_eq!(mixer.output(0)[0], StereoSample::new(2.0, 2.0));

        mixer.disable(b).unwrap();
        mixer.set_buffer_provider(a, Some(Box::new(VecProvider::new(vec![0.25; 4], 2)))).unwrap();
        mixer.process();
        assert_eq!(mixer.process_hook(), ProcessHook::OneTrackNoResampling);
        assert_eq!(mixer.output(0)[1], StereoSample::mono(0.25));
    }

    #[test]
    fn test_mixed_set_follows_enable_state() {
        let mut mixer = AudioMixer::new(settings(4));
        let slots: Vec<usize> = (0..4)
            .map(|_| add_track(&mut mixer, vec![0.0; 64], 1, 48000))
            .collect();

        mixer.disable(slots[1]).unwrap();
        mixer.disable(slots[3]).unwrap();
        mixer.enable(slots[3]).unwrap();
        mixer.process();
        assert_eq!(mixer.mixed_tracks(), &[slots[0], slots[2], slots[3]]);

        mixer.disable(slots[0]).unwrap();
        mixer.process();
        assert_eq!(mixer.mixed_tracks(), &[slots[2], slots[3]]);
    }

    #[test]
    fn test_partially_configured_slot_is_never_mixed() {
        let mut mixer = AudioMixer::new(settings(4));
        let slot = mixer.allocate().unwrap();
        mixer.enable(slot).unwrap();
        mixer.process();
        assert!(mixer.mixed_tracks().is_empty());
        assert_eq!(mixer.process_hook(), ProcessHook::NoTracks);

        mixer
            .set_buffer_provider(slot, Some(Box::new(VecProvider::new(vec![0.5; 8], 2))))
            .unwrap();
        mixer.process();
        assert!(mixer.mixed_tracks().is_empty());

        mixer.set_format(slot, 2, 48000).unwrap();
        mixer.process();
        assert_eq!(mixer.mixed_tracks(), &[slot]);
    }

    #[test]
    fn test_volume_ramp_spans_one_block() {
        let mut mixer = AudioMixer::new(settings(8));
        let slot = add_track(&mut mixer, vec![1.0; 64], 1, 48000);
        mixer.set_volume(slot, StereoGain::SILENT, false).unwrap();
        mixer.process();

        mixer.set_volume(slot, StereoGain::UNITY, true).unwrap();
        mixer.process();
        let out = mixer.output(0);
        assert_eq!(out[0].left, 0.0);
        for i in 1..8 {
            assert!(out[i].left > out[i - 1].left);
        }
        assert!(!mixer.is_ramping(slot));
        assert_eq!(mixer.volume(slot), Some(StereoGain::UNITY));

        mixer.process();
        assert!(mixer.output(0).iter().all(|s| s.left == 1.0));
    }

    #[test]
    fn test_mute_engages_after_ramp_finishes() {
        let mut mixer = AudioMixer::new(settings(4));
        let slot = add_track(&mut mixer, vec![1.0; 64], 2, 48000);
        mixer.process();
        assert_eq!(mixer.track_hook(slot), Some(TrackHook::NoResampleStereo));

        mixer.set_volume(slot, StereoGain::SILENT, true).unwrap();
        mixer.process();
        // Still ramping during this cycle: the mix path was used
        assert!(mixer.output(0)[0].left > 0.0);
        assert_eq!(mixer.track_hook(slot), Some(TrackHook::NoResampleStereo));

        mixer.process();
        assert_eq!(mixer.track_hook(slot), Some(TrackHook::Nop));
        assert!(mixer.output(0).iter().all(|s| *s == StereoSample::silence()));
        // Muted tracks keep consuming input
        assert_eq!(mixer.frames_ready(slot), 32 - 12);
    }

    #[test]
    fn test_half_rate_track_draws_half_the_input() {
        let mut mixer = AudioMixer::new(settings(100));
        let slot = mixer.allocate().unwrap();
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        mixer
            .set_buffer_provider(slot, Some(Box::new(VecProvider::new(input, 1))))
            .unwrap();
        mixer.set_format(slot, 1, 24000).unwrap();
        mixer.enable(slot).unwrap();

        mixer.process();
        assert_eq!(mixer.process_hook(), ProcessHook::GenericResampling);
        let drawn = 1000 - mixer.frames_ready(slot);
        assert!((48..=52).contains(&drawn), "drew {} input frames", drawn);
    }

    #[test]
    fn test_rate_is_capped() {
        let mut mixer = AudioMixer::new(settings(16));
        let slot = add_track(&mut mixer, vec![0.0; 64], 2, 192000);
        assert_eq!(mixer.sample_rate_of(slot), 96000);
    }

    #[test]
    fn test_starved_track_is_zero_filled_and_counted() {
        let mut mixer = AudioMixer::new(settings(8));
        let a = add_track(&mut mixer, vec![0.5; 6], 2, 48000);
        add_track(&mut mixer, vec![0.25; 16], 2, 48000);

        mixer.process();
        let out = mixer.output(0);
        assert_eq!(out[2], StereoSample::mono(0.75));
        assert_eq!(out[3], StereoSample::mono(0.25));
        let diagnostics = mixer.diagnostics(a);
        assert_eq!(diagnostics.silenced_frames, 5);
        assert_eq!(diagnostics.short_cycles, 1);
    }

    #[test]
    fn test_outputs_are_grouped() {
        let mut mixer = AudioMixer::new(settings(2));
        let a = add_track(&mut mixer, vec![1.0; 8], 2, 48000);
        let b = add_track(&mut mixer, vec![0.5; 8], 2, 48000);
        mixer.set_output(b, 1).unwrap();
        assert!(mixer.set_output(a, 2).is_err());

        mixer.process();
        assert_eq!(mixer.output(0)[0], StereoSample::mono(1.0));
        assert_eq!(mixer.output(1)[0], StereoSample::mono(0.5));

        mixer.fold_outputs();
        assert_eq!(mixer.output(0)[0], StereoSample::mono(1.5));
    }

    #[test]
    fn test_aux_send() {
        let mut mixer = AudioMixer::new(settings(2));
        let slot = add_track(&mut mixer, vec![1.0, 0.0, 1.0, 0.0], 2, 48000);
        mixer.set_aux_level(slot, 0.5, false).unwrap();
        mixer.process();
        assert_eq!(mixer.process_hook(), ProcessHook::GenericNoResampling);
        assert!((mixer.aux_output()[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_release_returns_provider() {
        let mut mixer = AudioMixer::new(settings(2));
        let slot = add_track(&mut mixer, vec![0.0; 8], 2, 48000);
        assert!(mixer.release(slot).unwrap().is_some());
        assert!(!mixer.is_allocated(slot));
        assert!(mixer.enable(slot).is_err());
        assert_eq!(mixer.allocate().unwrap(), slot);
    }

    #[test]
    fn test_frame_count_bounds() {
        let mut mixer = AudioMixer::new(settings(16));
        assert!(mixer.set_frame_count(32).is_err());
        mixer.set_frame_count(8).unwrap();
        mixer.process();
        assert_eq!(mixer.output(0).len(), 8);
    }
}
