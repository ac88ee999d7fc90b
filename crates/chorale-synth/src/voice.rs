//! A sounding note.
//!
//! Voices are built on the control side by
//! [`VoiceDefinition::create_voice`](crate::VoiceDefinition::create_voice) and
//! then owned by the mixer, which renders them on the audio thread. The two
//! kinds are variants of one enum so rendering dispatches with a `match`
//! instead of a vtable.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::generator::{
    cents_to_ratio, note_to_hz, Combinator, Envelope, EnvelopeState, Generator, LoopMode, Sampler,
    VoiceContext,
};
use crate::unison::UnisonStack;

/// Unique, monotonically increasing voice identifier. Doubles as start order.
pub type VoiceId = u64;

pub(crate) fn next_voice_id() -> VoiceId {
    static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Amplitude boost at full pressure.
const PRESSURE_DEPTH: f32 = 0.5;
/// Low-pass cutoff at timbre 0; each unit of timbre adds 6.5 octaves.
const FILTER_MIN_HZ: f32 = 200.0;
const FILTER_OCTAVES: f32 = 6.5;

/// Everything a definition needs to start one note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteContext {
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
    pub sample_rate: f32,
    /// -1.0 = left, 1.0 = right
    pub pan: f32,
    pub tuning_cents: f32,
    pub attenuation_db: f32,
    pub loop_mode: LoopMode,
}

impl NoteContext {
    pub fn new(note: u8, velocity: u8, channel: u8, sample_rate: f32) -> Self {
        Self {
            note: note.min(127),
            velocity: velocity.min(127),
            channel: channel.min(15),
            sample_rate,
            pan: 0.0,
            tuning_cents: 0.0,
            attenuation_db: 0.0,
            loop_mode: LoopMode::None,
        }
    }
}

/// Lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Active,
    Releasing,
    /// Forced fade after a kill or steal.
    Killed,
    Finished,
}

#[derive(Debug, Clone, Copy, Default)]
struct OnePole {
    state: f32,
}

impl OnePole {
    #[inline]
    fn process(&mut self, buffer: &mut [f32], cutoff: f32, sample_rate: f32) {
        let a = 1.0 - (-TAU * cutoff / sample_rate).exp();
        for sample in buffer.iter_mut() {
            self.state += a * (*sample - self.state);
            *sample = self.state;
        }
    }
}

/// State shared by both voice kinds.
#[derive(Debug, Clone)]
pub(crate) struct VoiceCore {
    id: VoiceId,
    note: u8,
    channel: u8,
    velocity: u8,
    pan: f32,
    gain: f32,
    sample_rate: f32,
    base_frequency: f32,
    bend_range: f32,
    bend: f32,
    pressure: f32,
    timbre: f32,
    filter: Option<OnePole>,
}

impl VoiceCore {
    pub(crate) fn new(ctx: &NoteContext, bend_range: f32, filter: bool) -> Self {
        let velocity_gain = ctx.velocity as f32 / 127.0;
        let attenuation = 10.0_f32.powf(-ctx.attenuation_db / 20.0);
        Self {
            id: next_voice_id(),
            note: ctx.note,
            channel: ctx.channel,
            velocity: ctx.velocity,
            pan: ctx.pan.clamp(-1.0, 1.0),
            gain: velocity_gain * attenuation,
            sample_rate: ctx.sample_rate,
            base_frequency: note_to_hz(ctx.note as f32) * cents_to_ratio(ctx.tuning_cents),
            bend_range,
            bend: 0.0,
            pressure: 0.0,
            timbre: 0.5,
            filter: filter.then(OnePole::default),
        }
    }

    pub(crate) fn id(&self) -> VoiceId {
        self.id
    }

    fn context(&self) -> VoiceContext {
        let frequency = self.base_frequency * 2.0_f32.powf(self.bend * self.bend_range / 12.0);
        VoiceContext {
            sample_rate: self.sample_rate,
            frequency,
            pressure: self.pressure,
            timbre: self.timbre,
        }
    }

    #[inline]
    fn render<G: Generator>(&mut self, chain: &mut G, out: &mut [f32]) -> usize {
        let ctx = self.context();
        let produced = chain.generate(out, &ctx);
        let rendered = &mut out[..produced];

        if let Some(filter) = &mut self.filter {
            let cutoff = FILTER_MIN_HZ * 2.0_f32.powf(self.timbre * FILTER_OCTAVES);
            let cutoff = cutoff.min(self.sample_rate * 0.45);
            filter.process(rendered, cutoff, self.sample_rate);
        }

        let gain = self.gain * (1.0 + PRESSURE_DEPTH * self.pressure);
        for sample in rendered.iter_mut() {
            *sample *= gain;
        }
        produced
    }
}

pub struct OscillatorVoice {
    pub(crate) core: VoiceCore,
    pub(crate) chain: Combinator<UnisonStack, Envelope>,
}

pub struct SampleVoice {
    pub(crate) core: VoiceCore,
    pub(crate) chain: Combinator<Sampler, Envelope>,
}

pub enum Voice {
    Oscillator(OscillatorVoice),
    Sample(SampleVoice),
}

impl Voice {
    #[inline]
    fn core(&self) -> &VoiceCore {
        match self {
            Voice::Oscillator(v) => &v.core,
            Voice::Sample(v) => &v.core,
        }
    }

    #[inline]
    fn core_mut(&mut self) -> &mut VoiceCore {
        match self {
            Voice::Oscillator(v) => &mut v.core,
            Voice::Sample(v) => &mut v.core,
        }
    }

    #[inline]
    pub fn envelope(&self) -> &Envelope {
        match self {
            Voice::Oscillator(v) => v.chain.second(),
            Voice::Sample(v) => v.chain.second(),
        }
    }

    #[inline]
    fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            Voice::Oscillator(v) => v.chain.second_mut(),
            Voice::Sample(v) => v.chain.second_mut(),
        }
    }

    pub fn id(&self) -> VoiceId {
        self.core().id
    }

    pub fn note(&self) -> u8 {
        self.core().note
    }

    pub fn channel(&self) -> u8 {
        self.core().channel
    }

    pub fn velocity(&self) -> u8 {
        self.core().velocity
    }

    pub fn pan(&self) -> f32 {
        self.core().pan
    }

    /// Current envelope level, used for quietest-voice stealing.
    pub fn level(&self) -> f32 {
        self.envelope().level()
    }

    pub fn state(&self) -> VoiceState {
        if self.is_finished() {
            return VoiceState::Finished;
        }
        let envelope = self.envelope();
        if envelope.is_killed() {
            VoiceState::Killed
        } else if envelope.state() == EnvelopeState::Release {
            VoiceState::Releasing
        } else {
            VoiceState::Active
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Voice::Oscillator(v) => v.chain.second().is_finished(),
            Voice::Sample(v) => v.chain.second().is_finished() || v.chain.first().is_exhausted(),
        }
    }

    pub fn is_releasing(&self) -> bool {
        self.state() == VoiceState::Releasing
    }

    pub fn is_killed(&self) -> bool {
        self.envelope().is_killed()
    }

    /// Enters the release stage.
    pub fn note_off(&mut self) {
        self.envelope_mut().note_off();
    }

    /// Fast fade to silence.
    pub fn kill(&mut self) {
        self.envelope_mut().kill();
    }

    /// `bend` is normalised to -1.0..=1.0 and scaled by the definition's range.
    pub fn set_pitch_bend(&mut self, bend: f32) {
        self.core_mut().bend = bend.clamp(-1.0, 1.0);
    }

    pub fn set_pressure(&mut self, pressure: f32) {
        self.core_mut().pressure = pressure.clamp(0.0, 1.0);
    }

    pub fn set_timbre(&mut self, timbre: f32) {
        self.core_mut().timbre = timbre.clamp(0.0, 1.0);
    }

    /// Current pitch in Hz including bend.
    pub fn frequency(&self) -> f32 {
        self.core().context().frequency
    }

    pub fn pressure(&self) -> f32 {
        self.core().pressure
    }

    pub fn timbre(&self) -> f32 {
        self.core().timbre
    }

    /// Renders mono samples into `out`; returns how many were produced.
    #[inline]
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        match self {
            Voice::Oscillator(v) => v.core.render(&mut v.chain, out),
            Voice::Sample(v) => v.core.render(&mut v.chain, out),
        }
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Voice::Oscillator(_) => "Oscillator",
            Voice::Sample(_) => "Sample",
        };
        f.debug_struct("Voice")
            .field("kind", &kind)
            .field("id", &self.id())
            .field("note", &self.note())
            .field("channel", &self.channel())
            .field("state", &self.state())
            .finish()
    }
}
