//! Key- and velocity-split instruments.
//!
//! An [`Instrument`] is an ordered list of [`VoiceMapping`]s plus one fallback
//! definition. Lookup walks the mappings in order and the first whose ranges
//! contain the note wins, so overlapping mappings are resolved by position.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::definition::VoiceDefinition;
use crate::error::{Error, Result};
use crate::generator::LoopMode;
use crate::voice::NoteContext;

/// Per-mapping performance parameters applied to every voice it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingParams {
    /// -1.0 = left, 1.0 = right
    pub pan: f32,
    pub tuning_cents: f32,
    pub attenuation_db: f32,
    pub loop_mode: LoopMode,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            pan: 0.0,
            tuning_cents: 0.0,
            attenuation_db: 0.0,
            loop_mode: LoopMode::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceMapping {
    keys: RangeInclusive<u8>,
    velocities: RangeInclusive<u8>,
    params: MappingParams,
    definition: Arc<VoiceDefinition>,
}

impl VoiceMapping {
    /// Covers the whole keyboard at every velocity until narrowed.
    pub fn new(definition: Arc<VoiceDefinition>) -> Self {
        Self {
            keys: 0..=127,
            velocities: 0..=127,
            params: MappingParams::default(),
            definition,
        }
    }

    pub fn keys(mut self, low: u8, high: u8) -> Self {
        self.keys = low..=high;
        self
    }

    pub fn velocities(mut self, low: u8, high: u8) -> Self {
        self.velocities = low..=high;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.params.pan = pan;
        self
    }

    pub fn tuning_cents(mut self, cents: f32) -> Self {
        self.params.tuning_cents = cents;
        self
    }

    pub fn attenuation_db(mut self, db: f32) -> Self {
        self.params.attenuation_db = db;
        self
    }

    pub fn loop_mode(mut self, mode: LoopMode) -> Self {
        self.params.loop_mode = mode;
        self
    }

    #[inline]
    pub fn matches(&self, note: u8, velocity: u8) -> bool {
        self.keys.contains(&note) && self.velocities.contains(&velocity)
    }

    pub fn key_range(&self) -> &RangeInclusive<u8> {
        &self.keys
    }

    pub fn velocity_range(&self) -> &RangeInclusive<u8> {
        &self.velocities
    }

    pub fn params(&self) -> &MappingParams {
        &self.params
    }

    pub fn definition(&self) -> &Arc<VoiceDefinition> {
        &self.definition
    }

    fn validate(&self, index: usize) -> Result<()> {
        for (what, range) in [("key", &self.keys), ("velocity", &self.velocities)] {
            if range.start() > range.end() || *range.end() > 127 {
                return Err(Error::InvalidInstrument(format!(
                    "mapping {index}: invalid {what} range {}..={}",
                    range.start(),
                    range.end()
                )));
            }
        }
        let p = &self.params;
        if !(-1.0..=1.0).contains(&p.pan) {
            return Err(Error::InvalidInstrument(format!(
                "mapping {index}: pan must be -1.0..=1.0, got {}",
                p.pan
            )));
        }
        if !p.tuning_cents.is_finite() || !p.attenuation_db.is_finite() || p.attenuation_db < 0.0 {
            return Err(Error::InvalidInstrument(format!(
                "mapping {index}: tuning and attenuation must be finite, attenuation >= 0"
            )));
        }
        Ok(())
    }
}

/// Result of a lookup: what to play and how.
#[derive(Debug, Clone)]
pub struct VoiceSelection {
    pub definition: Arc<VoiceDefinition>,
    pub params: MappingParams,
}

impl VoiceSelection {
    pub fn note_context(&self, note: u8, velocity: u8, channel: u8, sample_rate: f32) -> NoteContext {
        NoteContext {
            pan: self.params.pan,
            tuning_cents: self.params.tuning_cents,
            attenuation_db: self.params.attenuation_db,
            loop_mode: self.params.loop_mode,
            ..NoteContext::new(note, velocity, channel, sample_rate)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    mappings: Vec<VoiceMapping>,
    fallback: Arc<VoiceDefinition>,
}

impl Instrument {
    pub fn builder(name: impl Into<String>, fallback: Arc<VoiceDefinition>) -> InstrumentBuilder {
        InstrumentBuilder {
            name: name.into(),
            mappings: Vec::new(),
            fallback,
        }
    }

    /// An instrument with no mappings; every note plays `definition`.
    pub fn single(name: impl Into<String>, definition: Arc<VoiceDefinition>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mappings: Vec::new(),
            fallback: definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mappings(&self) -> &[VoiceMapping] {
        &self.mappings
    }

    pub fn fallback(&self) -> &Arc<VoiceDefinition> {
        &self.fallback
    }

    fn find(&self, note: u8, velocity: u8) -> Option<&VoiceMapping> {
        self.mappings.iter().find(|m| m.matches(note, velocity))
    }

    /// Definition of the first matching mapping, else the fallback.
    pub fn voice_definition(&self, note: u8, velocity: u8) -> &Arc<VoiceDefinition> {
        self.find(note, velocity)
            .map(|m| &m.definition)
            .unwrap_or(&self.fallback)
    }

    pub fn select(&self, note: u8, velocity: u8) -> VoiceSelection {
        match self.find(note, velocity) {
            Some(m) => VoiceSelection {
                definition: Arc::clone(&m.definition),
                params: m.params,
            },
            None => VoiceSelection {
                definition: Arc::clone(&self.fallback),
                params: MappingParams::default(),
            },
        }
    }
}

pub struct InstrumentBuilder {
    name: String,
    mappings: Vec<VoiceMapping>,
    fallback: Arc<VoiceDefinition>,
}

impl InstrumentBuilder {
    /// Appends a mapping. Earlier mappings take precedence.
    pub fn mapping(mut self, mapping: VoiceMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> Result<Arc<Instrument>> {
        for (index, mapping) in self.mappings.iter().enumerate() {
            mapping.validate(index)?;
        }
        Ok(Arc::new(Instrument {
            name: self.name,
            mappings: self.mappings,
            fallback: self.fallback,
        }))
    }
}
