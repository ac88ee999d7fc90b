//! Sample-by-sample combination of two generators.

use super::{Generator, VoiceContext, MAX_BLOCK_SIZE};

type BinaryOp = fn(f32, f32) -> f32;

/// Runs `first` into the output buffer and `second` into a preallocated
/// scratch block, then merges them with `op`. The result is as long as the
/// shorter of the two.
pub struct Combinator<A, B, F = BinaryOp> {
    first: A,
    second: B,
    op: F,
    scratch: Box<[f32]>,
}

impl<A: Generator, B: Generator> Combinator<A, B, BinaryOp> {
    /// Amplitude modulation, e.g. oscillator × envelope.
    pub fn multiply(first: A, second: B) -> Self {
        Self::new(first, second, |a, b| a * b)
    }

    pub fn sum(first: A, second: B) -> Self {
        Self::new(first, second, |a, b| a + b)
    }
}

impl<A, B, F> Combinator<A, B, F>
where
    A: Generator,
    B: Generator,
    F: Fn(f32, f32) -> f32 + Send,
{
    pub fn new(first: A, second: B, op: F) -> Self {
        Self {
            first,
            second,
            op,
            scratch: vec![0.0; MAX_BLOCK_SIZE].into_boxed_slice(),
        }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }

    pub fn first_mut(&mut self) -> &mut A {
        &mut self.first
    }

    pub fn second_mut(&mut self) -> &mut B {
        &mut self.second
    }
}

impl<A, B, F> Generator for Combinator<A, B, F>
where
    A: Generator,
    B: Generator,
    F: Fn(f32, f32) -> f32 + Send,
{
    fn generate(&mut self, out: &mut [f32], ctx: &VoiceContext) -> usize {
        let mut total = 0;
        let mut ran_dry = false;
        for chunk in out.chunks_mut(MAX_BLOCK_SIZE) {
            let len = chunk.len();
            let scratch = &mut self.scratch[..len];
            let produced_a = self.first.generate(chunk, ctx);
            let produced_b = self.second.generate(scratch, ctx);
            let produced = produced_a.min(produced_b);

            for (a, &b) in chunk[..produced].iter_mut().zip(scratch.iter()) {
                *a = (self.op)(*a, b);
            }
            chunk[produced..].fill(0.0);
            total += produced;

            if produced < len {
                ran_dry = true;
                break;
            }
        }
        if ran_dry {
            // Once either side runs dry the rest of the request is silence
            out[total..].fill(0.0);
        }
        total
    }

    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }

    fn is_exhausted(&self) -> bool {
        self.first.is_exhausted() || self.second.is_exhausted()
    }
}

impl<A: std::fmt::Debug, B: std::fmt::Debug, F> std::fmt::Debug for Combinator<A, B, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Combinator")
            .field("first", &self.first)
            .field("second", &self.second)
            .finish()
    }
}
