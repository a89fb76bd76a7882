//! Effect-chain boundary
//!
//! Effects are external to the engine. A chain is attached per effect
//! session: tracks in that session are mixed into a dedicated output
//! buffer, the chain processes it in place, and the result is summed into
//! the main mix. An optional aux chain processes the aux send bus and its
//! output (the "return") is added to the main mix as well.

use crate::error::{MixerError, MixerResult};
use crate::mixer::AudioMixer;
use crate::types::StereoSample;

/// Effect sessions the normal mixer has outputs for
pub const MAX_EFFECT_SESSIONS: usize = 4;

/// An external effect chain, run by the control loop
pub trait EffectChain: Send {
    fn name(&self) -> &str {
        "effect-chain"
    }

    /// Process one mix period in place
    fn process(&mut self, buffer: &mut [StereoSample]);
}

struct Session {
    id: u32,
    chain: Box<dyn EffectChain>,
}

/// Attached chains and the mixer outputs they own
pub(crate) struct EffectSessions {
    sessions: [Option<Session>; MAX_EFFECT_SESSIONS],
    aux: Option<Box<dyn EffectChain>>,
    aux_return: Vec<StereoSample>,
}

impl EffectSessions {
    pub fn new(max_frames: usize) -> Self {
        Self {
            sessions: std::array::from_fn(|_| None),
            aux: None,
            aux_return: vec![StereoSample::silence(); max_frames],
        }
    }

    /// Mixer outputs needed: the main mix plus one per session
    pub const fn output_count() -> usize {
        1 + MAX_EFFECT_SESSIONS
    }

    /// Attach (or replace) the chain of `session`; returns its output index
    pub fn attach(&mut self, session: u32, chain: Box<dyn EffectChain>) -> MixerResult<usize> {
        let index = match self.index_of(session) {
            Some(index) => index,
            None => self
                .sessions
                .iter()
                .position(Option::is_none)
                .ok_or(MixerError::NoFreeSlot)?,
        };
        log::info!("Effect chain '{}' attached to session {}", chain.name(), session);
        self.sessions[index] = Some(Session { id: session, chain });
        Ok(index + 1)
    }

    /// Detach the chain of `session`; returns the output it used
    pub fn detach(&mut self, session: u32) -> Option<usize> {
        let index = self.index_of(session)?;
        if let Some(removed) = self.sessions[index].take() {
            log::info!("Effect chain '{}' detached from session {}", removed.chain.name(), session);
        }
        Some(index + 1)
    }

    pub fn set_aux(&mut self, chain: Option<Box<dyn EffectChain>>) {
        self.aux = chain;
    }

    /// Output index for a track in `session` (0 = straight to the main mix)
    pub fn output_for(&self, session: Option<u32>) -> usize {
        session
            .and_then(|session| self.index_of(session))
            .map_or(0, |index| index + 1)
    }

    fn index_of(&self, session: u32) -> Option<usize> {
        self.sessions
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.id == session))
    }

    /// Run every chain on the last mix and fold the results into output 0
    pub fn process(&mut self, mixer: &mut AudioMixer) {
        let frames = mixer.frame_count();
        for (index, session) in self.sessions.iter_mut().enumerate() {
            let Some(session) = session else {
                continue;
            };
            if let Some(output) = mixer.output_mut(index + 1) {
                session.chain.process(&mut output.as_mut_slice()[..frames]);
            }
        }
        mixer.fold_outputs();

        let Some(aux) = self.aux.as_mut() else {
            return;
        };
        let frames = frames.min(self.aux_return.len());
        for (frame, &send) in self.aux_return[..frames].iter_mut().zip(mixer.aux_output()) {
            *frame = StereoSample::mono(send);
        }
        aux.process(&mut self.aux_return[..frames]);
        if let Some(main) = mixer.output_mut(0) {
            for (out, ret) in main.as_mut_slice()[..frames].iter_mut().zip(&self.aux_return) {
                out.left += ret.left;
                out.right += ret.right;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scale(f32);

    impl EffectChain for Scale {
        fn process(&mut self, buffer: &mut [StereoSample]) {
            for frame in buffer {
                frame.left *= self.0;
                frame.right *= self.0;
            }
        }
    }

    #[test]
    fn test_sessions_map_to_outputs() {
        let mut sessions = EffectSessions::new(16);
        assert_eq!(sessions.output_for(Some(7)), 0);
        assert_eq!(sessions.attach(7, Box::new(Scale(0.5))).unwrap(), 1);
        assert_eq!(sessions.attach(9, Box::new(Scale(0.5))).unwrap(), 2);
        // Replacing keeps the output
        assert_eq!(sessions.attach(7, Box::new(Scale(2.0))).unwrap(), 1);
        assert_eq!(sessions.output_for(Some(9)), 2);
        assert_eq!(sessions.output_for(None), 0);

        assert_eq!(sessions.detach(7), Some(1));
        assert_eq!(sessions.output_for(Some(7)), 0);
        assert_eq!(sessions.detach(7), None);
    }

    #[test]
    fn test_session_limit() {
        let mut sessions = EffectSessions::new(16);
        for id in 0..MAX_EFFECT_SESSIONS as u32 {
            sessions.attach(id, Box::new(Scale(1.0))).unwrap();
        }
        assert!(matches!(
            sessions.attach(99, Box::new(Scale(1.0))),
            Err(MixerError::NoFreeSlot)
        ));
    }
}
