//! Linear ADSR envelope.
//!
//! ```text
//!  level
//!   1.0 ┐   ╱╲
//!       │  ╱  ╲________
//!    S  │ ╱            ╲
//!   0.0 └╱──────────────╲──▶ Finished
//!        A   D    S      R
//! ```
//!
//! Every stage is a straight line. Release starts from whatever level the
//! envelope had when the note was let go, so releasing mid-attack does not
//! click. A stage whose duration is shorter than one sample completes in one
//! sample.

use serde::{Deserialize, Serialize};

use super::{Generator, VoiceContext};
use crate::error::{Error, Result};

/// Duration of the forced fade used when a voice is killed or stolen.
pub const KILL_FADE_SECONDS: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Seconds.
    pub attack: f32,
    /// Seconds.
    pub decay: f32,
    /// 0.0 - 1.0
    pub sustain: f32,
    /// Seconds.
    pub release: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

impl EnvelopeConfig {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// Quick attack, no decay, full sustain.
    pub fn organ() -> Self {
        Self::new(0.001, 0.0, 1.0, 0.01)
    }

    /// Plucky envelope with fast attack and decay.
    pub fn pluck() -> Self {
        Self::new(0.001, 0.3, 0.0, 0.1)
    }

    /// Pad-style envelope with slow attack and release.
    pub fn pad() -> Self {
        Self::new(0.5, 0.2, 0.8, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} time must be finite and >= 0, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(Error::InvalidConfig(format!(
                "sustain must be in 0.0-1.0, got {}",
                self.sustain
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    config: EnvelopeConfig,
    sample_rate: f32,
    state: EnvelopeState,
    level: f32,
    /// Per-sample decrement while releasing, fixed when release begins.
    release_step: f32,
    killed: bool,
}

/// Slack for float accumulation at stage boundaries.
const LEVEL_EPSILON: f32 = 1e-6;

/// Samples spanned by a stage of `seconds`, never less than one.
#[inline]
fn stage_samples(seconds: f32, sample_rate: f32) -> f32 {
    (seconds * sample_rate).max(1.0)
}

impl Envelope {
    /// Starts in Attack at level 0. The config is assumed validated.
    pub fn new(config: EnvelopeConfig, sample_rate: f32) -> Self {
        Self {
            config,
            sample_rate,
            state: EnvelopeState::Attack,
            level: 0.0,
            release_step: 0.0,
            killed: false,
        }
    }

    #[inline]
    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == EnvelopeState::Finished
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.state == EnvelopeState::Release
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Enters Release from the current level. No-op once releasing.
    pub fn note_off(&mut self) {
        if matches!(self.state, EnvelopeState::Release | EnvelopeState::Finished) {
            return;
        }
        self.begin_release(self.config.release);
    }

    /// Fades to silence over [`KILL_FADE_SECONDS`], overriding any release
    /// already in progress.
    pub fn kill(&mut self) {
        if self.state == EnvelopeState::Finished {
            return;
        }
        self.killed = true;
        self.begin_release(KILL_FADE_SECONDS);
    }

    fn begin_release(&mut self, seconds: f32) {
        self.release_step = self.level / stage_samples(seconds, self.sample_rate);
        self.state = EnvelopeState::Release;
    }

    /// Advances one sample and returns the new level.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        match self.state {
            EnvelopeState::Attack => {
                self.level += 1.0 / stage_samples(self.config.attack, self.sample_rate);
                if self.level >= 1.0 - LEVEL_EPSILON {
                    self.level = 1.0;
                    self.state = EnvelopeState::Decay;
                }
            }
            EnvelopeState::Decay => {
                let sustain = self.config.sustain;
                self.level -= (1.0 - sustain) / stage_samples(self.config.decay, self.sample_rate);
                if self.level <= sustain + LEVEL_EPSILON {
                    self.level = sustain;
                    if sustain <= 0.0 {
                        self.begin_release(self.config.release);
                    } else {
                        self.state = EnvelopeState::Sustain;
                    }
                }
            }
            EnvelopeState::Sustain => {}
            EnvelopeState::Release => {
                self.level -= self.release_step;
                if self.level <= LEVEL_EPSILON {
                    self.level = 0.0;
                    self.state = EnvelopeState::Finished;
                }
            }
            EnvelopeState::Finished => {}
        }
        debug_assert!((0.0..=1.0).contains(&self.level));
        self.level
    }
}

impl Generator for Envelope {
    fn generate(&mut self, out: &mut [f32], _ctx: &VoiceContext) -> usize {
        if self.is_finished() {
            out.fill(0.0);
        } else {
            for sample in out.iter_mut() {
                *sample = self.next_sample();
            }
        }
        out.len()
    }

    fn reset(&mut self) {
        self.state = EnvelopeState::Attack;
        self.level = 0.0;
        self.release_step = 0.0;
        self.killed = false;
    }

    fn is_exhausted(&self) -> bool {
        self.is_finished()
    }
}
