//! Synthesis building blocks for Chorale.
//!
//! - **Generators** - [`Oscillator`], [`Envelope`], [`Sampler`] and the
//!   [`Combinator`] that chains them
//! - **[`VoiceDefinition`]** - the recipe a note is built from
//! - **[`Voice`]** - one sounding note, either oscillator- or sample-based
//! - **[`Instrument`]** - first-match key/velocity splits with a fallback
//! - **[`InstrumentBank`]** - bank/program lookup for Program Change
//! - **[`StealPolicy`]** - which voice gives way when polyphony runs out
//!
//! # Quick Start
//!
//! ```
//! use chorale_synth::{EnvelopeConfig, NoteContext, UnisonConfig, VoiceDefinition, Waveform};
//!
//! let lead = VoiceDefinition::builder("lead")
//!     .waveform(Waveform::Sawtooth)
//!     .unison(UnisonConfig::new(3, 15.0))
//!     .envelope(EnvelopeConfig::new(0.01, 0.2, 0.6, 0.3))
//!     .build()?;
//!
//! let mut voice = lead.create_voice(&NoteContext::new(60, 100, 0, 48_000.0));
//! let mut block = [0.0f32; 256];
//! voice.render(&mut block);
//! voice.note_off();
//! # Ok::<(), chorale_synth::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod generator;

pub use generator::{
    cents_to_ratio, note_to_hz, Combinator, Envelope, EnvelopeConfig, EnvelopeState, Generator,
    LoopMode, Oscillator, SampleData, Sampler, VoiceContext, Waveform, KILL_FADE_SECONDS,
    MAX_BLOCK_SIZE,
};

mod unison;

pub use unison::{UnisonConfig, UnisonStack, MAX_UNISON_VOICES};

mod voice;

pub use voice::{NoteContext, OscillatorVoice, SampleVoice, Voice, VoiceId, VoiceState};

mod definition;

pub use definition::{VoiceDefinition, VoiceDefinitionBuilder, MAX_PITCH_BEND_RANGE};

mod instrument;

pub use instrument::{Instrument, InstrumentBuilder, MappingParams, VoiceMapping, VoiceSelection};

mod bank;

pub use bank::{InstrumentBank, StaticBank};

mod steal;

pub use steal::{choose_victim, StealPolicy};
