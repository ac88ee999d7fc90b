//! Route modifiers: filter, transform or generate messages.
//!
//! A [`MidiModifier`] pairs a stable [`ModifierId`] and an enable flag with a
//! [`MessageTransform`]. Transforms take `&self` because the same chain
//! snapshot may be traversed from several emitting threads at once; stateful
//! transforms keep their state in atomics.
//!
//! Built-in transforms can be described by a serialisable [`ModifierConfig`],
//! which is how chains are persisted and rebuilt.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::error::{Error, Result};
use crate::message::{Command, MidiMessage};

/// Output buffer for one transform step. Spills to the heap only for very
/// large fan-out (chords wider than 8 notes).
pub type ModifierOutput = SmallVec<[MidiMessage; 8]>;

/// Stable modifier identity, used for persistence and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModifierId(pub u64);

impl ModifierId {
    /// Process-unique id for modifiers that were not loaded from a preset.
    pub fn next() -> Self {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(1 << 32);
        ModifierId(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ModifierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mod-{}", self.0)
    }
}

/// `message -> zero | one | many messages`.
pub trait MessageTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Push zero or more results onto `out`. Must not clear `out`.
    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput);

    /// Serialisable description, if this is a built-in transform.
    fn config(&self) -> Option<ModifierConfig> {
        None
    }
}

/// A transform with identity and an enable flag.
pub struct MidiModifier {
    id: ModifierId,
    enabled: AtomicBool,
    transform: Box<dyn MessageTransform>,
}

impl MidiModifier {
    pub fn new(transform: impl MessageTransform + 'static) -> Arc<Self> {
        Self::with_id(ModifierId::next(), transform)
    }

    pub fn with_id(id: ModifierId, transform: impl MessageTransform + 'static) -> Arc<Self> {
        Arc::new(Self {
            id,
            enabled: AtomicBool::new(true),
            transform: Box::new(transform),
        })
    }

    /// Rebuilds a persisted modifier.
    pub fn from_preset(preset: &ModifierPreset) -> Result<Arc<Self>> {
        let modifier = Arc::new(Self {
            id: preset.id,
            enabled: AtomicBool::new(preset.enabled),
            transform: preset.config.build()?,
        });
        Ok(modifier)
    }

    #[inline]
    pub fn id(&self) -> ModifierId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.transform.name()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Takes effect on the next message traversal.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        self.transform.apply(message, out);
    }

    /// `None` for closure-based modifiers, which cannot be persisted.
    pub fn preset(&self) -> Option<ModifierPreset> {
        self.transform.config().map(|config| ModifierPreset {
            id: self.id,
            enabled: self.is_enabled(),
            config,
        })
    }
}

impl std::fmt::Debug for MidiModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiModifier")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Runs `message` through every enabled modifier of `chain`, in order.
///
/// Each modifier sees every output of the previous one. Results are appended
/// to `out`.
pub fn apply_chain(chain: &[Arc<MidiModifier>], message: MidiMessage, out: &mut ModifierOutput) {
    let mut current: ModifierOutput = smallvec![message];
    let mut next = ModifierOutput::new();

    for modifier in chain.iter().filter(|m| m.is_enabled()) {
        next.clear();
        for msg in current.drain(..) {
            modifier.apply(msg, &mut next);
        }
        std::mem::swap(&mut current, &mut next);
        if current.is_empty() {
            return;
        }
    }

    out.extend(current);
}

/// Persisted form of a modifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierPreset {
    pub id: ModifierId,
    pub enabled: bool,
    pub config: ModifierConfig,
}

/// Serialisable description of the built-in transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModifierConfig {
    Transpose { semitones: i8 },
    VelocityScale { factor: f32 },
    ChannelFilter { channels: Vec<u8> },
    ChannelMap { channel: u8 },
    KeyRange { min: u8, max: u8 },
    Chord { intervals: Vec<i8> },
}

impl ModifierConfig {
    /// Validates and builds the transform.
    pub fn build(&self) -> Result<Box<dyn MessageTransform>> {
        Ok(match self {
            ModifierConfig::Transpose { semitones } => Box::new(Transpose::new(*semitones)),
            ModifierConfig::VelocityScale { factor } => Box::new(VelocityScale::new(*factor)?),
            ModifierConfig::ChannelFilter { channels } => {
                Box::new(ChannelFilter::from_channels(channels)?)
            }
            ModifierConfig::ChannelMap { channel } => Box::new(ChannelMap::new(*channel)?),
            ModifierConfig::KeyRange { min, max } => Box::new(KeyRange::new(*min, *max)?),
            ModifierConfig::Chord { intervals } => Box::new(Chord::new(intervals.clone())?),
        })
    }

    /// Builds a fresh modifier with a new id.
    pub fn into_modifier(self) -> Result<Arc<MidiModifier>> {
        MidiModifier::from_preset(&ModifierPreset {
            id: ModifierId::next(),
            enabled: true,
            config: self,
        })
    }
}

#[inline]
fn is_note_message(message: &MidiMessage) -> bool {
    matches!(
        message.command(),
        Command::NoteOn | Command::NoteOff | Command::PolyPressure
    )
}

#[inline]
fn shift_note(note: u8, semitones: i32) -> Option<u8> {
    let shifted = note as i32 + semitones;
    (0..=127).contains(&shifted).then_some(shifted as u8)
}

/// Shifts note messages by a number of semitones. Notes pushed outside
/// 0..=127 are dropped.
#[derive(Debug, Clone, Copy)]
pub struct Transpose {
    semitones: i8,
}

impl Transpose {
    pub fn new(semitones: i8) -> Self {
        Self { semitones }
    }
}

impl MessageTransform for Transpose {
    fn name(&self) -> &str {
        "Transpose"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        if !is_note_message(&message) {
            out.push(message);
            return;
        }
        if let Some(note) = shift_note(message.data1(), self.semitones as i32) {
            out.push(message.with_data(note, message.data2()));
        }
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::Transpose {
            semitones: self.semitones,
        })
    }
}

/// Scales Note-On velocity. Results are clamped to 1..=127 so a scaled
/// Note-On never turns into a Note-Off.
#[derive(Debug, Clone, Copy)]
pub struct VelocityScale {
    factor: f32,
}

impl VelocityScale {
    pub fn new(factor: f32) -> Result<Self> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "velocity factor must be finite and non-negative, got {factor}"
            )));
        }
        Ok(Self { factor })
    }
}

impl MessageTransform for VelocityScale {
    fn name(&self) -> &str {
        "VelocityScale"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        if !message.is_note_on() {
            out.push(message);
            return;
        }
        let scaled = (message.data2() as f32 * self.factor).round().clamp(1.0, 127.0) as u8;
        out.push(message.with_data(message.data1(), scaled));
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::VelocityScale {
            factor: self.factor,
        })
    }
}

/// Passes only messages on the selected channels (bit n = channel n).
#[derive(Debug, Clone, Copy)]
pub struct ChannelFilter {
    mask: u16,
}

impl ChannelFilter {
    pub fn new(mask: u16) -> Self {
        Self { mask }
    }

    pub fn from_channels(channels: &[u8]) -> Result<Self> {
        let mut mask = 0u16;
        for &channel in channels {
            if channel > 15 {
                return Err(Error::InvalidConfig(format!(
                    "channel must be 0-15, got {channel}"
                )));
            }
            mask |= 1 << channel;
        }
        Ok(Self { mask })
    }
}

impl MessageTransform for ChannelFilter {
    fn name(&self) -> &str {
        "ChannelFilter"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        if self.mask & (1 << message.channel()) != 0 {
            out.push(message);
        }
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::ChannelFilter {
            channels: (0..16).filter(|c| self.mask & (1 << c) != 0).collect(),
        })
    }
}

/// Moves every channel message to a fixed channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMap {
    channel: u8,
}

impl ChannelMap {
    pub fn new(channel: u8) -> Result<Self> {
        if channel > 15 {
            return Err(Error::InvalidConfig(format!(
                "channel must be 0-15, got {channel}"
            )));
        }
        Ok(Self { channel })
    }
}

impl MessageTransform for ChannelMap {
    fn name(&self) -> &str {
        "ChannelMap"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        out.push(message.with_channel(self.channel));
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::ChannelMap {
            channel: self.channel,
        })
    }
}

/// Drops note messages outside an inclusive key range.
#[derive(Debug, Clone, Copy)]
pub struct KeyRange {
    min: u8,
    max: u8,
}

impl KeyRange {
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max || max > 127 {
            return Err(Error::InvalidConfig(format!(
                "invalid key range {min}..={max}"
            )));
        }
        Ok(Self { min, max })
    }
}

impl MessageTransform for KeyRange {
    fn name(&self) -> &str {
        "KeyRange"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        match message.note() {
            Some(note) if !(self.min..=self.max).contains(&note) => {}
            _ => out.push(message),
        }
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::KeyRange {
            min: self.min,
            max: self.max,
        })
    }
}

/// Expands each Note-On/Note-Off into the root plus one note per interval.
#[derive(Debug, Clone)]
pub struct Chord {
    intervals: Vec<i8>,
}

impl Chord {
    pub fn new(intervals: Vec<i8>) -> Result<Self> {
        if intervals.is_empty() {
            return Err(Error::InvalidConfig("chord needs at least one interval".into()));
        }
        Ok(Self { intervals })
    }

    pub fn major() -> Self {
        Self {
            intervals: vec![4, 7],
        }
    }

    pub fn minor() -> Self {
        Self {
            intervals: vec![3, 7],
        }
    }
}

impl MessageTransform for Chord {
    fn name(&self) -> &str {
        "Chord"
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        out.push(message);
        if !matches!(message.command(), Command::NoteOn | Command::NoteOff) {
            return;
        }
        for &interval in &self.intervals {
            if let Some(note) = shift_note(message.data1(), interval as i32) {
                out.push(message.with_data(note, message.data2()));
            }
        }
    }

    fn config(&self) -> Option<ModifierConfig> {
        Some(ModifierConfig::Chord {
            intervals: self.intervals.clone(),
        })
    }
}

/// Closure-backed transform. Not persistable.
pub struct FnModifier<F> {
    name: String,
    f: F,
}

impl<F> FnModifier<F>
where
    F: Fn(MidiMessage, &mut ModifierOutput) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> MessageTransform for FnModifier<F>
where
    F: Fn(MidiMessage, &mut ModifierOutput) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, message: MidiMessage, out: &mut ModifierOutput) {
        (self.f)(message, out)
    }
}
