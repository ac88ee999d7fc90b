//! Builder for configuring and constructing a `ChoraleEngine`.

use std::sync::Arc;

use chorale_core::{Mixer, SynthDestination};
use chorale_midi::{MidiBackend, MidiRouter};
use chorale_synth::{Instrument, InstrumentBank, StealPolicy, VoiceDefinition};
use tracing::debug;

use crate::{ChoraleEngine, EngineConfig, Result};

/// Without an explicit instrument every channel starts on a plain sawtooth.
/// With the `midi-hardware` feature the midir backend is installed unless
/// another one is given.
///
/// # Example
///
/// ```
/// use chorale::prelude::*;
///
/// let engine = ChoraleEngine::builder()
///     .sample_rate(44_100.0)
///     .max_voices(16)
///     .steal_policy(StealPolicy::Quietest)
///     .build()?;
///
/// assert_eq!(engine.sample_rate(), 44_100.0);
/// # Ok::<(), chorale::Error>(())
/// ```
pub struct ChoraleEngineBuilder {
    config: EngineConfig,
    instrument: Option<Arc<Instrument>>,
    bank: Option<Arc<dyn InstrumentBank>>,
    backend: Option<Arc<dyn MidiBackend>>,
}

impl Default for ChoraleEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            instrument: None,
            bank: None,
            backend: None,
        }
    }
}

impl ChoraleEngineBuilder {
    /// Replaces every setting with `config`.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.config.mixer.sample_rate = sample_rate;
        self
    }

    /// Default: 32
    pub fn max_voices(mut self, voices: usize) -> Self {
        self.config.mixer.max_voices = voices;
        self
    }

    /// Default: `Oldest`
    pub fn steal_policy(mut self, policy: StealPolicy) -> Self {
        self.config.mixer.steal_policy = policy;
        self
    }

    /// Default: 1024
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.mixer.queue_capacity = capacity;
        self
    }

    pub fn master_gain(mut self, gain: f32) -> Self {
        self.config.mixer.master_gain = gain;
        self
    }

    /// Instrument every channel starts on.
    pub fn instrument(mut self, instrument: Arc<Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// Bank consulted on Program Change.
    pub fn bank(mut self, bank: Arc<dyn InstrumentBank>) -> Self {
        self.bank = Some(bank);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn MidiBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<ChoraleEngine> {
        self.config.validate()?;

        let instrument = match self.instrument {
            Some(instrument) => instrument,
            None => Instrument::single("default", VoiceDefinition::builder("default").build()?),
        };

        let (mixer, handle) = Mixer::new(self.config.mixer)?;

        let mut synth = SynthDestination::new("synth", handle.clone(), instrument);
        if let Some(bank) = self.bank {
            synth = synth.with_bank(bank);
        }

        #[allow(unused_mut)]
        let mut backend = self.backend;
        #[cfg(feature = "midi-hardware")]
        if backend.is_none() {
            backend = Some(Arc::new(chorale_midi::MidirBackend::new(
                self.config.client_name.clone(),
            )));
        }

        debug!(
            sample_rate = self.config.mixer.sample_rate,
            max_voices = self.config.mixer.max_voices,
            steal_policy = ?self.config.mixer.steal_policy,
            "Built engine"
        );

        Ok(ChoraleEngine::from_parts(
            self.config,
            MidiRouter::new(),
            Arc::new(synth),
            handle,
            mixer,
            backend,
        ))
    }
}
