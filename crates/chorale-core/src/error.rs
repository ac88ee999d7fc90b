//! Error types for chorale-core.

use thiserror::Error;

/// Error type for chorale-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The render side (and its command receiver) has been dropped.
    #[error("Mixer closed")]
    MixerClosed,

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Synth error: {0}")]
    Synth(#[from] chorale_synth::Error),

    #[cfg(feature = "std")]
    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "std")]
    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "std")]
    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "std")]
    #[error("Failed to pause audio stream")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[cfg(feature = "std")]
    #[error("Failed to enumerate devices")]
    DevicesError(#[from] cpal::DevicesError),

    #[cfg(feature = "std")]
    #[error("Failed to get device name")]
    DeviceNameError(#[from] cpal::DeviceNameError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
