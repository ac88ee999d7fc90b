//! Band-limited oscillator.
//!
//! Phase is kept as a fraction of a cycle in `[0, 1)`. Sawtooth and square
//! get a PolyBLEP correction at each discontinuity to suppress aliasing.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use super::{Generator, VoiceContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    #[default]
    Sawtooth,
    Triangle,
}

/// Polynomial band-limited step residual for phase `t` and increment `dt`.
#[inline]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
    initial_phase: f32,
    /// Multiplies the voice frequency (unison detune).
    ratio: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self::detuned(waveform, 1.0, 0.0)
    }

    /// `ratio` scales the context frequency; `phase` is the start position
    /// as a fraction of a cycle.
    pub fn detuned(waveform: Waveform, ratio: f32, phase: f32) -> Self {
        let phase = phase.rem_euclid(1.0);
        Self {
            waveform,
            phase,
            initial_phase: phase,
            ratio,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// One sample at `frequency` Hz.
    #[inline]
    pub fn next_sample(&mut self, frequency: f32, sample_rate: f32) -> f32 {
        let dt = (frequency * self.ratio / sample_rate).clamp(0.0, 0.5);
        let t = self.phase;

        let value = match self.waveform {
            Waveform::Sine => (t * TAU).sin(),
            Waveform::Sawtooth => 2.0 * t - 1.0 - poly_blep(t, dt),
            Waveform::Square => {
                let naive = if t < 0.5 { 1.0 } else { -1.0 };
                naive + poly_blep(t, dt) - poly_blep((t + 0.5).rem_euclid(1.0), dt)
            }
            Waveform::Triangle => 1.0 - 4.0 * (t - 0.5).abs(),
        };

        self.phase += dt;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }
}

impl Generator for Oscillator {
    fn generate(&mut self, out: &mut [f32], ctx: &VoiceContext) -> usize {
        for sample in out.iter_mut() {
            *sample = self.next_sample(ctx.frequency, ctx.sample_rate);
        }
        out.len()
    }

    fn reset(&mut self) {
        self.phase = self.initial_phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f32 = 48_000.0;

    fn render(waveform: Waveform, frequency: f32, samples: usize) -> Vec<f32> {
        let mut osc = Oscillator::new(waveform);
        let mut out = vec![0.0; samples];
        osc.generate(&mut out, &VoiceContext::new(SR, frequency));
        out
    }

    #[test]
    fn test_sine_quarter_cycle() {
        // 1 kHz at 48 kHz: 12 samples per quarter cycle
        let out = render(Waveform::Sine, 1000.0, 13);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[12], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_outputs_are_bounded() {
        for waveform in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Sawtooth,
            Waveform::Triangle,
        ] {
            let out = render(waveform, 3_517.0, 4_800);
            assert!(
                out.iter().all(|s| s.abs() <= 1.0 + 1e-5),
                "{waveform:?} exceeded unit range"
            );
        }
    }

    #[test]
    fn test_phase_wraps() {
        let mut osc = Oscillator::new(Waveform::Sawtooth);
        for _ in 0..100_000 {
            osc.next_sample(12_345.0, SR);
            assert!((0.0..1.0).contains(&osc.phase()));
        }
    }

    #[test]
    fn test_blep_smooths_saw_discontinuity() {
        // Near the wrap the corrected saw must not jump by the full 2.0
        let out = render(Waveform::Sawtooth, 4_000.0, 48);
        let max_jump = out
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_jump < 1.9, "max jump {max_jump}");
    }

    #[test]
    fn test_detune_ratio_and_reset() {
        let mut osc = Oscillator::detuned(Waveform::Sine, 2.0, 0.25);
        assert_relative_eq!(osc.next_sample(1000.0, SR), 1.0, epsilon = 1e-6);
        // Advanced by 2 kHz worth of phase
        assert_relative_eq!(osc.phase(), 0.25 + 2000.0 / SR, epsilon = 1e-6);
        osc.reset();
        assert_relative_eq!(osc.phase(), 0.25);
    }
}
