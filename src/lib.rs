//! # Chorale - Real-time MIDI Routing and Polyphonic Synthesis
//!
//! ## Architecture
//!
//! Chorale is an umbrella crate that coordinates:
//! - **chorale-midi** - Messages, sources, modifier chains, routes, recorder, hardware I/O
//! - **chorale-synth** - Generators, voices, instruments, voice stealing
//! - **chorale-core** - Mixer, synth destination, CPAL output
//!
//! ## Quick Start
//!
//! ```
//! use chorale::prelude::*;
//!
//! let lead = VoiceDefinition::builder("lead")
//!     .waveform(Waveform::Square)
//!     .envelope(EnvelopeConfig::pluck())
//!     .build()?;
//!
//! let mut engine = ChoraleEngine::builder()
//!     .instrument(Instrument::single("lead", lead))
//!     .build()?;
//!
//! let keyboard = MidiSource::new("keyboard");
//! let route = engine.connect_source(&keyboard)?;
//! route.add_processor(ModifierConfig::Transpose { semitones: 12 }.into_modifier()?);
//!
//! keyboard.emit_message(MidiMessage::note_on(0, 60, 100));
//! let mut out = vec![0.0f32; 1024];
//! engine.render(&mut out, 512)?;
//! # Ok::<(), chorale::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `std` - CPAL audio output (default)
//! - `midi-hardware` - Hardware MIDI ports via midir (default)

pub use chorale_core as core;
pub use chorale_midi as midi;
pub use chorale_synth as synth;

mod error;
pub use error::{Error, Result};

mod config;
pub use config::EngineConfig;

mod builder;
pub use builder::ChoraleEngineBuilder;

mod engine;
pub use engine::ChoraleEngine;

pub use chorale_core::{Mixer, MixerConfig, MixerHandle, SynthDestination};
#[cfg(feature = "std")]
pub use chorale_core::PlaybackDevice;

pub use chorale_midi::{
    fault_channel, MidiBackend, MidiDestination, MidiMessage, MidiModifier, MidiPacket,
    MidiRecorder, MidiRoute, MidiRouter, MidiSource, ModifierConfig, RouteFault, SysExMessage,
};
#[cfg(feature = "midi-hardware")]
pub use chorale_midi::MidirBackend;

pub use chorale_synth::{
    EnvelopeConfig, Instrument, InstrumentBank, LoopMode, SampleData, StaticBank, StealPolicy,
    UnisonConfig, Voice, VoiceDefinition, VoiceMapping, Waveform,
};

pub mod prelude {
    //! Everything needed for the common case.
    pub use crate::{
        ChoraleEngine, EngineConfig, EnvelopeConfig, Instrument, LoopMode, MidiDestination,
        MidiMessage, MidiModifier, MidiRoute, MidiSource, ModifierConfig, SampleData, StaticBank,
        StealPolicy, UnisonConfig, VoiceDefinition, VoiceMapping, Waveform,
    };
}
