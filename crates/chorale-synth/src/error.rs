//! Error types for chorale-synth.

use thiserror::Error;

/// Result type alias for chorale-synth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chorale-synth.
///
/// All of these are construction-time failures. Nothing on the render path
/// returns an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Sample data unusable for playback.
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// Instrument has no usable fallback or a malformed mapping.
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),
}
