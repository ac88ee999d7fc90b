//! Sample playback with linear interpolation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{note_to_hz, Generator, VoiceContext};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Play once, then silence.
    #[default]
    None,
    /// Wrap around the whole buffer.
    Continuous,
}

/// Immutable mono sample buffer shared by every voice that plays it.
#[derive(Debug, Clone)]
pub struct SampleData {
    frames: Arc<[f32]>,
    sample_rate: f32,
    root_note: u8,
}

impl SampleData {
    pub fn new(frames: impl Into<Arc<[f32]>>, sample_rate: f32, root_note: u8) -> Result<Self> {
        let frames = frames.into();
        if frames.is_empty() {
            return Err(Error::InvalidSample("sample has no frames".into()));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::InvalidSample(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if root_note > 127 {
            return Err(Error::InvalidSample(format!(
                "root note must be 0-127, got {root_note}"
            )));
        }
        Ok(Self {
            frames,
            sample_rate,
            root_note,
        })
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    pub fn root_frequency(&self) -> f32 {
        note_to_hz(self.root_note as f32)
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    data: Arc<SampleData>,
    loop_mode: LoopMode,
    position: f64,
    exhausted: bool,
}

impl Sampler {
    pub fn new(data: Arc<SampleData>, loop_mode: LoopMode) -> Self {
        Self {
            data,
            loop_mode,
            position: 0.0,
            exhausted: false,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Read-head advance per output sample for the given context.
    #[inline]
    pub fn playback_rate(&self, ctx: &VoiceContext) -> f64 {
        let pitch = ctx.frequency / self.data.root_frequency();
        let resample = self.data.sample_rate / ctx.sample_rate;
        (pitch * resample) as f64
    }
}

impl Generator for Sampler {
    fn generate(&mut self, out: &mut [f32], ctx: &VoiceContext) -> usize {
        let frames = self.data.frames();
        let len = frames.len();
        let rate = self.playback_rate(ctx);

        let mut produced = 0;
        for sample in out.iter_mut() {
            if self.exhausted {
                *sample = 0.0;
                continue;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let current = frames[index];
            let next = match (index + 1 < len, self.loop_mode) {
                (true, _) => frames[index + 1],
                (false, LoopMode::Continuous) => frames[0],
                (false, LoopMode::None) => 0.0,
            };
            *sample = current + (next - current) * frac;
            produced += 1;

            self.position += rate;
            if self.position >= len as f64 {
                match self.loop_mode {
                    LoopMode::Continuous => self.position = self.position.rem_euclid(len as f64),
                    LoopMode::None => self.exhausted = true,
                }
            }
        }
        produced
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.exhausted = false;
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
