//! Centralized error type for the chorale umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] chorale_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] chorale_midi::Error),

    #[error("Synth: {0}")]
    Synth(#[from] chorale_synth::Error),

    /// The mixer is owned by a running audio device.
    #[error("Mixer is driven by the audio device")]
    MixerInUse,

    #[error("No MIDI backend configured")]
    NoBackend,
}

pub type Result<T> = std::result::Result<T, Error>;
