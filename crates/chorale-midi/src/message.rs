//! Immutable MIDI message values.
//!
//! [`MidiMessage`] is a three-byte channel message plus a timestamp. Everything
//! else (command, channel, note, controller, bend) is derived from the status
//! and data bytes with bit masks, so the type stays `Copy` and can be passed
//! around freely on any thread.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Microseconds, as reported by the device backend (or the emitter).
pub type Timestamp = u64;

/// Channel-voice command nibble (upper four bits of the status byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    /// 0xF0..=0xFF status bytes (system common / real time).
    System,
}

impl Command {
    #[inline]
    pub fn from_status(status: u8) -> Self {
        match status & 0xF0 {
            0x80 => Command::NoteOff,
            0x90 => Command::NoteOn,
            0xA0 => Command::PolyPressure,
            0xB0 => Command::ControlChange,
            0xC0 => Command::ProgramChange,
            0xD0 => Command::ChannelPressure,
            0xE0 => Command::PitchBend,
            _ => Command::System,
        }
    }

    /// Status nibble for this command (0 for `System`).
    #[inline]
    pub fn nibble(self) -> u8 {
        match self {
            Command::NoteOff => 0x80,
            Command::NoteOn => 0x90,
            Command::PolyPressure => 0xA0,
            Command::ControlChange => 0xB0,
            Command::ProgramChange => 0xC0,
            Command::ChannelPressure => 0xD0,
            Command::PitchBend => 0xE0,
            Command::System => 0xF0,
        }
    }

    /// Number of data bytes that follow the status byte on the wire.
    #[inline]
    pub fn data_len(self) -> usize {
        match self {
            Command::ProgramChange | Command::ChannelPressure => 1,
            Command::System => 0,
            _ => 2,
        }
    }
}

/// Channel message with a backend timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    status: u8,
    data1: u8,
    data2: u8,
    timestamp: Timestamp,
}

impl MidiMessage {
    /// Builds a message from raw bytes. Data bytes are masked to 7 bits.
    #[inline]
    pub fn new(status: u8, data1: u8, data2: u8, timestamp: Timestamp) -> Self {
        Self {
            status,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
            timestamp,
        }
    }

    #[inline]
    fn channel_message(command: Command, channel: u8, data1: u8, data2: u8) -> Self {
        let channel = channel.min(15); // MIDI channels are 0-15
        Self::new(command.nibble() | channel, data1, data2, 0)
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_message(Command::NoteOn, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_message(Command::NoteOff, channel, note, velocity)
    }

    pub fn poly_pressure(channel: u8, note: u8, pressure: u8) -> Self {
        Self::channel_message(Command::PolyPressure, channel, note, pressure)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::channel_message(Command::ControlChange, channel, controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::channel_message(Command::ProgramChange, channel, program, 0)
    }

    pub fn channel_pressure(channel: u8, pressure: u8) -> Self {
        Self::channel_message(Command::ChannelPressure, channel, pressure, 0)
    }

    /// `value`: signed 14-bit (-8192 to 8191), clamped.
    pub fn pitch_bend(channel: u8, value: i16) -> Self {
        let unsigned = (value as i32 + 8192).clamp(0, 16383) as u16;
        let lsb = (unsigned & 0x7F) as u8;
        let msb = ((unsigned >> 7) & 0x7F) as u8;
        Self::channel_message(Command::PitchBend, channel, lsb, msb)
    }

    /// Parses one channel message. Running status and system messages are rejected.
    pub fn from_bytes(bytes: &[u8], timestamp: Timestamp) -> Result<Self> {
        let (&status, data) = bytes
            .split_first()
            .ok_or_else(|| Error::InvalidMessage("empty message".into()))?;
        if status & 0x80 == 0 {
            return Err(Error::InvalidMessage(format!(
                "missing status byte (got {status:#04x})"
            )));
        }
        let command = Command::from_status(status);
        if command == Command::System {
            return Err(Error::InvalidMessage(format!(
                "not a channel message: {status:#04x}"
            )));
        }
        if data.len() < command.data_len() {
            return Err(Error::InvalidMessage(format!(
                "{command:?} needs {} data bytes, got {}",
                command.data_len(),
                data.len()
            )));
        }
        let data1 = data.first().copied().unwrap_or(0);
        let data2 = if command.data_len() == 2 { data[1] } else { 0 };
        Ok(Self::new(status, data1, data2, timestamp))
    }

    /// Wire encoding (2 or 3 bytes depending on the command).
    pub fn to_bytes(&self) -> ([u8; 3], usize) {
        let len = 1 + self.command().data_len();
        ([self.status, self.data1, self.data2], len)
    }

    #[inline]
    pub fn with_timestamp(self, timestamp: Timestamp) -> Self {
        Self { timestamp, ..self }
    }

    /// Same command and timestamp with different data bytes.
    #[inline]
    pub fn with_data(self, data1: u8, data2: u8) -> Self {
        Self::new(self.status, data1, data2, self.timestamp)
    }

    /// Same payload on another channel.
    #[inline]
    pub fn with_channel(self, channel: u8) -> Self {
        if self.command() == Command::System {
            return self;
        }
        Self {
            status: (self.status & 0xF0) | channel.min(15),
            ..self
        }
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[inline]
    pub fn data1(&self) -> u8 {
        self.data1
    }

    #[inline]
    pub fn data2(&self) -> u8 {
        self.data2
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn command(&self) -> Command {
        Command::from_status(self.status)
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.command() == Command::NoteOn && self.data2 > 0
    }

    /// NoteOff, or NoteOn with velocity 0.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        match self.command() {
            Command::NoteOff => true,
            Command::NoteOn => self.data2 == 0,
            _ => false,
        }
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.command() {
            Command::NoteOn | Command::NoteOff | Command::PolyPressure => Some(self.data1),
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        match self.command() {
            Command::NoteOn | Command::NoteOff => Some(self.data2),
            _ => None,
        }
    }

    #[inline]
    pub fn controller(&self) -> Option<u8> {
        (self.command() == Command::ControlChange).then_some(self.data1)
    }

    #[inline]
    pub fn controller_value(&self) -> Option<u8> {
        (self.command() == Command::ControlChange).then_some(self.data2)
    }

    #[inline]
    pub fn program(&self) -> Option<u8> {
        (self.command() == Command::ProgramChange).then_some(self.data1)
    }

    /// Channel pressure or polyphonic key pressure.
    #[inline]
    pub fn pressure(&self) -> Option<u8> {
        match self.command() {
            Command::ChannelPressure => Some(self.data1),
            Command::PolyPressure => Some(self.data2),
            _ => None,
        }
    }

    /// Signed 14-bit bend, centre 0.
    #[inline]
    pub fn pitch_bend_value(&self) -> Option<i16> {
        (self.command() == Command::PitchBend)
            .then(|| (((self.data2 as i16) << 7) | self.data1 as i16) - 8192)
    }
}

/// A complete system-exclusive payload, `F0 .. F7` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysExMessage {
    data: Arc<[u8]>,
    timestamp: Timestamp,
}

impl SysExMessage {
    pub fn new(data: impl Into<Arc<[u8]>>, timestamp: Timestamp) -> Result<Self> {
        let data = data.into();
        match (data.first(), data.last()) {
            (Some(0xF0), Some(0xF7)) if data.len() >= 2 => Ok(Self { data, timestamp }),
            _ => Err(Error::InvalidMessage(
                "SysEx payload must start with F0 and end with F7".into(),
            )),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Unit emitted by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiPacket {
    Channel(MidiMessage),
    SysEx(SysExMessage),
}

impl MidiPacket {
    /// Classifies raw backend bytes.
    pub fn from_bytes(bytes: &[u8], timestamp: Timestamp) -> Result<Self> {
        if bytes.first() == Some(&0xF0) {
            SysExMessage::new(bytes, timestamp).map(MidiPacket::SysEx)
        } else {
            MidiMessage::from_bytes(bytes, timestamp).map(MidiPacket::Channel)
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            MidiPacket::Channel(m) => m.timestamp(),
            MidiPacket::SysEx(s) => s.timestamp(),
        }
    }
}

impl From<MidiMessage> for MidiPacket {
    fn from(message: MidiMessage) -> Self {
        MidiPacket::Channel(message)
    }
}

impl From<SysExMessage> for MidiPacket {
    fn from(message: SysExMessage) -> Self {
        MidiPacket::SysEx(message)
    }
}
