//! Sample generators.
//!
//! A [`Generator`] fills a mono buffer from its internal state. Generators are
//! owned by exactly one voice and are driven only from the render thread, so
//! they take `&mut self` and never allocate after construction.

mod combinator;
mod envelope;
mod oscillator;
mod sampler;

pub use combinator::Combinator;
pub use envelope::{Envelope, EnvelopeConfig, EnvelopeState, KILL_FADE_SECONDS};
pub use oscillator::{Oscillator, Waveform};
pub use sampler::{LoopMode, SampleData, Sampler};

/// Largest block any generator processes in one pass. Larger requests are
/// split into chunks of this size.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Per-block modulation state handed down by the owning voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceContext {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Target pitch in Hz after tuning and pitch bend.
    pub frequency: f32,
    /// Channel or polyphonic pressure, 0..=1.
    pub pressure: f32,
    /// Timbre controller (CC 74), 0..=1.
    pub timbre: f32,
}

impl VoiceContext {
    pub fn new(sample_rate: f32, frequency: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            pressure: 0.0,
            timbre: 0.5,
        }
    }
}

pub trait Generator: Send {
    /// Writes up to `out.len()` samples and returns how many were produced.
    ///
    /// A short count means the generator ran out (a one-shot sample reached
    /// its end); the remainder of `out` is zeroed.
    fn generate(&mut self, out: &mut [f32], ctx: &VoiceContext) -> usize;

    /// Returns to the initial state.
    fn reset(&mut self);

    /// True once the generator will only produce silence.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// MIDI note number to frequency, A4 = 440 Hz.
#[inline]
pub fn note_to_hz(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// Frequency ratio for a pitch offset in cents.
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}
