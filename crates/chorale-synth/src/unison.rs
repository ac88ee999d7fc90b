//! Unison: several detuned oscillators summed into one voice.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::generator::{cents_to_ratio, Generator, Oscillator, VoiceContext, Waveform};

pub const MAX_UNISON_VOICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnisonConfig {
    /// 1-8
    pub voices: u8,
    /// Total spread in cents (not per-voice)
    pub detune_cents: f32,
    /// Start each oscillator at a random phase to avoid a phasey attack.
    pub phase_randomize: bool,
}

impl Default for UnisonConfig {
    fn default() -> Self {
        Self {
            voices: 1,
            detune_cents: 0.0,
            phase_randomize: false,
        }
    }
}

impl UnisonConfig {
    pub fn new(voices: u8, detune_cents: f32) -> Self {
        Self {
            voices,
            detune_cents,
            phase_randomize: voices > 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.voices == 0 || self.voices as usize > MAX_UNISON_VOICES {
            return Err(Error::InvalidConfig(format!(
                "unison voice count must be 1-{MAX_UNISON_VOICES}, got {}",
                self.voices
            )));
        }
        if !self.detune_cents.is_finite() || self.detune_cents < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "unison detune must be finite and >= 0, got {}",
                self.detune_cents
            )));
        }
        Ok(())
    }

    /// Frequency ratio of oscillator `index`, spread symmetrically around 1.0.
    pub fn ratio(&self, index: usize) -> f32 {
        let count = self.voices.max(1) as usize;
        if count == 1 {
            return 1.0;
        }
        let position = (index as f32 / (count - 1) as f32) * 2.0 - 1.0;
        cents_to_ratio(self.detune_cents * 0.5 * position)
    }

    /// Equal-power gain per oscillator.
    pub fn amplitude(&self) -> f32 {
        1.0 / (self.voices.max(1) as f32).sqrt()
    }
}

/// The oscillator bank of one voice. Fixed capacity, no allocation.
#[derive(Debug, Clone)]
pub struct UnisonStack {
    oscillators: [Oscillator; MAX_UNISON_VOICES],
    count: usize,
    amplitude: f32,
}

impl UnisonStack {
    /// `seed` drives phase randomisation (xorshift); any value works.
    pub fn new(waveform: Waveform, config: &UnisonConfig, seed: u32) -> Self {
        let count = (config.voices as usize).clamp(1, MAX_UNISON_VOICES);
        let mut rng_state = if seed == 0 { 1 } else { seed };
        let oscillators = std::array::from_fn(|i| {
            let phase = if config.phase_randomize && i < count {
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 17;
                rng_state ^= rng_state << 5;
                rng_state as f32 / u32::MAX as f32
            } else {
                0.0
            };
            Oscillator::detuned(waveform, config.ratio(i), phase)
        });

        Self {
            oscillators,
            count,
            amplitude: config.amplitude(),
        }
    }

    pub fn voice_count(&self) -> usize {
        self.count
    }

    pub fn oscillators(&self) -> &[Oscillator] {
        &self.oscillators[..self.count]
    }
}

impl Generator for UnisonStack {
    fn generate(&mut self, out: &mut [f32], ctx: &VoiceContext) -> usize {
        let oscillators = &mut self.oscillators[..self.count];
        for sample in out.iter_mut() {
            let mut sum = 0.0;
            for osc in oscillators.iter_mut() {
                sum += osc.next_sample(ctx.frequency, ctx.sample_rate);
            }
            *sample = sum * self.amplitude;
        }
        out.len()
    }

    fn reset(&mut self) {
        for osc in &mut self.oscillators {
            osc.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_voice() {
        let config = UnisonConfig::default();
        assert_relative_eq!(config.ratio(0), 1.0);
        assert_relative_eq!(config.amplitude(), 1.0);
        assert_eq!(UnisonStack::new(Waveform::Sine, &config, 1).voice_count(), 1);
    }

    #[test]
    fn test_detune_spread() {
        let config = UnisonConfig::new(3, 12.0);
        assert_relative_eq!(config.ratio(1), 1.0);
        let low = config.ratio(0);
        let high = config.ratio(2);
        assert!(low < 1.0 && high > 1.0);
        // Symmetric detune, total spread 12 cents
        assert_relative_eq!(1.0 / low, high, epsilon = 1e-6);
        assert_relative_eq!(high / low, cents_to_ratio(12.0), epsilon = 1e-6);
    }

    #[test]
    fn test_equal_power_amplitude() {
        for voices in 1..=MAX_UNISON_VOICES as u8 {
            let config = UnisonConfig::new(voices, 10.0);
            let sum_sq = config.amplitude().powi(2) * voices as f32;
            assert_relative_eq!(sum_sq, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_phase_randomization() {
        let stack = UnisonStack::new(Waveform::Sawtooth, &UnisonConfig::new(4, 8.0), 42);
        let phases: Vec<f32> = stack.oscillators().iter().map(|o| o.phase()).collect();
        assert!(phases.iter().all(|p| (0.0..1.0).contains(p)));
        assert!(phases.windows(2).any(|w| (w[0] - w[1]).abs() > 1e-3));
    }

    #[test]
    fn test_validate_voice_count() {
        assert!(UnisonConfig::new(0, 0.0).validate().is_err());
        assert!(UnisonConfig::new(9, 0.0).validate().is_err());
        assert!(UnisonConfig::new(8, 25.0).validate().is_ok());
        assert!(UnisonConfig::new(2, -1.0).validate().is_err());
    }

    #[test]
    fn test_stack_output_bounded() {
        let mut stack = UnisonStack::new(Waveform::Square, &UnisonConfig::new(8, 30.0), 7);
        let mut out = [0.0f32; 512];
        stack.generate(&mut out, &VoiceContext::new(48_000.0, 220.0));
        let bound = (MAX_UNISON_VOICES as f32).sqrt() + 1e-3;
        assert!(out.iter().all(|s| s.abs() <= bound));
    }
}
