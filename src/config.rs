//! Serialisable engine settings.

use chorale_core::MixerConfig;
use chorale_midi::ModifierPreset;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Everything needed to rebuild an engine except instruments and samples.
///
/// ```
/// use chorale::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{
///     "mixer": { "max_voices": 16, "steal_policy": "quietest" },
///     "synth_chain": [
///         { "id": 1, "enabled": true, "config": { "type": "transpose", "semitones": -12 } }
///     ]
/// }"#).unwrap();
/// assert_eq!(config.mixer.max_voices, 16);
/// assert_eq!(config.mixer.sample_rate, 48_000.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mixer: MixerConfig,
    /// Client name reported to the MIDI backend.
    pub client_name: String,
    /// Modifiers applied to every route created with
    /// [`ChoraleEngine::connect_source`](crate::ChoraleEngine::connect_source).
    pub synth_chain: Vec<ModifierPreset>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mixer: MixerConfig::default(),
            client_name: "chorale".into(),
            synth_chain: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.mixer.validate()?;
        for preset in &self.synth_chain {
            preset.config.build()?;
        }
        Ok(())
    }
}
