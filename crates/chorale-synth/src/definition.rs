//! Voice definitions: the recipe a mapping uses to start a note.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::generator::{Combinator, Envelope, EnvelopeConfig, SampleData, Sampler, Waveform};
use crate::unison::{UnisonConfig, UnisonStack};
use crate::voice::{NoteContext, OscillatorVoice, SampleVoice, Voice, VoiceCore};

/// Upper limit for pitch bend range in semitones.
pub const MAX_PITCH_BEND_RANGE: f32 = 48.0;

/// Immutable description of how to build a voice. Shared by `Arc` between
/// instruments; creating a voice never mutates it.
#[derive(Debug, Clone)]
pub struct VoiceDefinition {
    name: String,
    waveform: Waveform,
    unison: UnisonConfig,
    envelope: EnvelopeConfig,
    filter: bool,
    sample: Option<Arc<SampleData>>,
    pitch_bend_range: f32,
}

impl VoiceDefinition {
    pub fn builder(name: impl Into<String>) -> VoiceDefinitionBuilder {
        VoiceDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn unison(&self) -> &UnisonConfig {
        &self.unison
    }

    pub fn envelope(&self) -> &EnvelopeConfig {
        &self.envelope
    }

    pub fn has_filter(&self) -> bool {
        self.filter
    }

    pub fn sample(&self) -> Option<&Arc<SampleData>> {
        self.sample.as_ref()
    }

    /// Semitones covered by a full pitch bend.
    pub fn pitch_bend_range(&self) -> f32 {
        self.pitch_bend_range
    }

    /// Builds a fresh voice for one note. A sample-backed definition yields
    /// a sample voice, anything else an oscillator voice.
    pub fn create_voice(&self, ctx: &NoteContext) -> Voice {
        let core = VoiceCore::new(ctx, self.pitch_bend_range, self.filter);
        let envelope = Envelope::new(self.envelope, ctx.sample_rate);

        match &self.sample {
            Some(data) => Voice::Sample(SampleVoice {
                core,
                chain: Combinator::multiply(Sampler::new(Arc::clone(data), ctx.loop_mode), envelope),
            }),
            None => {
                // Voice ids are unique, so every voice gets its own phase pattern
                let seed = (core.id() as u32) ^ ((ctx.note as u32) << 24);
                Voice::Oscillator(OscillatorVoice {
                    core,
                    chain: Combinator::multiply(
                        UnisonStack::new(self.waveform, &self.unison, seed),
                        envelope,
                    ),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceDefinitionBuilder {
    name: String,
    waveform: Waveform,
    unison: UnisonConfig,
    envelope: EnvelopeConfig,
    filter: bool,
    sample: Option<Arc<SampleData>>,
    pitch_bend_range: f32,
}

impl VoiceDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waveform: Waveform::default(),
            unison: UnisonConfig::default(),
            envelope: EnvelopeConfig::default(),
            filter: false,
            sample: None,
            pitch_bend_range: 2.0,
        }
    }

    pub fn waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn unison(mut self, unison: UnisonConfig) -> Self {
        self.unison = unison;
        self
    }

    pub fn envelope(mut self, envelope: EnvelopeConfig) -> Self {
        self.envelope = envelope;
        self
    }

    /// Enables the timbre-controlled low-pass filter.
    pub fn filter(mut self, enabled: bool) -> Self {
        self.filter = enabled;
        self
    }

    pub fn sample(mut self, sample: Arc<SampleData>) -> Self {
        self.sample = Some(sample);
        self
    }

    pub fn pitch_bend_range(mut self, semitones: f32) -> Self {
        self.pitch_bend_range = semitones;
        self
    }

    pub fn build(self) -> Result<Arc<VoiceDefinition>> {
        self.unison.validate()?;
        self.envelope.validate()?;
        if !(0.0..=MAX_PITCH_BEND_RANGE).contains(&self.pitch_bend_range) {
            return Err(Error::InvalidConfig(format!(
                "pitch bend range must be 0-{MAX_PITCH_BEND_RANGE} semitones, got {}",
                self.pitch_bend_range
            )));
        }
        Ok(Arc::new(VoiceDefinition {
            name: self.name,
            waveform: self.waveform,
            unison: self.unison,
            envelope: self.envelope,
            filter: self.filter,
            sample: self.sample,
            pitch_bend_range: self.pitch_bend_range,
        }))
    }
}
