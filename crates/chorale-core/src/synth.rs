//! MIDI destination that plays notes on the mixer.
//!
//! [`SynthDestination`] turns channel messages into voices and mixer
//! commands. It keeps per-channel state (current instrument, bank select,
//! sustain pedal) behind a control-side mutex; the audio thread never sees
//! that mutex, only the commands it produces.

use std::sync::Arc;

use chorale_midi::{Command, DestinationKind, MidiDestination, MidiMessage};
use chorale_synth::{Instrument, InstrumentBank};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::handle::MixerHandle;

const CC_BANK_MSB: u8 = 0;
const CC_BANK_LSB: u8 = 32;
const CC_SUSTAIN: u8 = 64;
const CC_TIMBRE: u8 = 74;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_RESET_CONTROLLERS: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

const DEFAULT_TIMBRE: f32 = 0.5;

#[derive(Debug, Clone)]
struct ChannelState {
    instrument: Arc<Instrument>,
    bank_msb: u8,
    bank_lsb: u8,
    sustain: bool,
    /// Bit per note released while the pedal was down.
    deferred: u128,
    /// Channel controllers, applied to every new voice.
    bend: f32,
    pressure: f32,
    timbre: f32,
}

impl ChannelState {
    fn new(instrument: Arc<Instrument>) -> Self {
        Self {
            instrument,
            bank_msb: 0,
            bank_lsb: 0,
            sustain: false,
            deferred: 0,
            bend: 0.0,
            pressure: 0.0,
            timbre: DEFAULT_TIMBRE,
        }
    }

    fn reset_controllers(&mut self) {
        self.bend = 0.0;
        self.pressure = 0.0;
        self.timbre = DEFAULT_TIMBRE;
    }

    fn bank(&self) -> u16 {
        ((self.bank_msb as u16) << 7) | self.bank_lsb as u16
    }
}

/// Internal destination driving the synthesis engine.
pub struct SynthDestination {
    name: String,
    mixer: MixerHandle,
    bank: Option<Arc<dyn InstrumentBank>>,
    channels: Mutex<[ChannelState; 16]>,
}

impl SynthDestination {
    /// Every channel starts on `instrument`.
    pub fn new(name: impl Into<String>, mixer: MixerHandle, instrument: Arc<Instrument>) -> Self {
        Self {
            name: name.into(),
            mixer,
            bank: None,
            channels: Mutex::new(std::array::from_fn(|_| {
                ChannelState::new(Arc::clone(&instrument))
            })),
        }
    }

    /// Bank consulted on Program Change. Without one, program changes are
    /// ignored.
    pub fn with_bank(mut self, bank: Arc<dyn InstrumentBank>) -> Self {
        self.bank = Some(bank);
        self
    }

    pub fn mixer(&self) -> &MixerHandle {
        &self.mixer
    }

    pub fn instrument(&self, channel: u8) -> Arc<Instrument> {
        Arc::clone(&self.channels.lock()[(channel & 0x0F) as usize].instrument)
    }

    pub fn set_instrument(&self, channel: u8, instrument: Arc<Instrument>) {
        self.channels.lock()[(channel & 0x0F) as usize].instrument = instrument;
    }

    pub fn is_sustained(&self, channel: u8) -> bool {
        self.channels.lock()[(channel & 0x0F) as usize].sustain
    }

    fn handle(&self, message: &MidiMessage) -> crate::Result<()> {
        let channel = message.channel();
        let mut channels = self.channels.lock();
        let state = &mut channels[channel as usize];

        match message.command() {
            Command::NoteOn if message.is_note_on() => {
                let (note, velocity) = (message.data1(), message.data2());
                state.deferred &= !(1u128 << note);
                let selection = state.instrument.select(note, velocity);
                let ctx = selection.note_context(note, velocity, channel, self.mixer.sample_rate());
                trace!(
                    channel,
                    note,
                    velocity,
                    definition = selection.definition.name(),
                    "Note on"
                );
                let mut voice = selection.definition.create_voice(&ctx);
                voice.set_pitch_bend(state.bend);
                voice.set_pressure(state.pressure);
                voice.set_timbre(state.timbre);
                self.mixer.start_voice(voice)
            }
            Command::NoteOn | Command::NoteOff => {
                let note = message.data1();
                if state.sustain {
                    state.deferred |= 1u128 << note;
                    Ok(())
                } else {
                    self.mixer.note_off(channel, note)
                }
            }
            Command::ControlChange => {
                let (controller, value) = (message.data1(), message.data2());
                match controller {
                    CC_BANK_MSB => state.bank_msb = value,
                    CC_BANK_LSB => state.bank_lsb = value,
                    CC_SUSTAIN => {
                        let down = value >= 64;
                        if state.sustain && !down {
                            release_deferred(&self.mixer, channel, &mut state.deferred)?;
                        }
                        state.sustain = down;
                    }
                    CC_TIMBRE => {
                        state.timbre = value as f32 / 127.0;
                        self.mixer.timbre(channel, state.timbre)?;
                    }
                    CC_ALL_SOUND_OFF => {
                        state.deferred = 0;
                        self.mixer.all_sound_off(Some(channel))?;
                    }
                    CC_RESET_CONTROLLERS => {
                        if state.sustain {
                            release_deferred(&self.mixer, channel, &mut state.deferred)?;
                        }
                        state.sustain = false;
                        state.reset_controllers();
                        self.mixer.pitch_bend(channel, state.bend)?;
                        self.mixer.pressure(channel, state.pressure)?;
                        self.mixer.timbre(channel, state.timbre)?;
                    }
                    CC_ALL_NOTES_OFF => {
                        state.deferred = 0;
                        self.mixer.all_notes_off(Some(channel))?;
                    }
                    _ => trace!(channel, controller, value, "Unhandled controller"),
                }
                Ok(())
            }
            Command::PitchBend => {
                let raw = message.pitch_bend_value().unwrap_or(0) as f32;
                state.bend = if raw >= 0.0 { raw / 8191.0 } else { raw / 8192.0 };
                self.mixer.pitch_bend(channel, state.bend)
            }
            Command::ChannelPressure => {
                state.pressure = message.data1() as f32 / 127.0;
                self.mixer.pressure(channel, state.pressure)
            }
            Command::PolyPressure => self.mixer.poly_pressure(
                channel,
                message.data1(),
                message.data2() as f32 / 127.0,
            ),
            Command::ProgramChange => {
                let program = message.data1();
                let bank_number = state.bank();
                match self.bank.as_ref().map(|b| b.instrument(bank_number, program)) {
                    Some(Some(instrument)) => {
                        debug!(
                            channel,
                            bank = bank_number,
                            program,
                            instrument = instrument.name(),
                            "Program change"
                        );
                        state.instrument = instrument;
                    }
                    Some(None) => warn!(
                        channel,
                        bank = bank_number,
                        program,
                        "No instrument for program change"
                    ),
                    None => trace!(channel, program, "Program change ignored, no bank"),
                }
                Ok(())
            }
            Command::System => Ok(()),
        }
    }
}

fn release_deferred(mixer: &MixerHandle, channel: u8, deferred: &mut u128) -> crate::Result<()> {
    while *deferred != 0 {
        let note = deferred.trailing_zeros() as u8;
        *deferred &= !(1u128 << note);
        mixer.note_off(channel, note)?;
    }
    Ok(())
}

impl MidiDestination for SynthDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Internal
    }

    fn send(&self, message: &MidiMessage) -> chorale_midi::Result<()> {
        self.handle(message)
            .map_err(|e| chorale_midi::Error::Disconnected(format!("{}: {e}", self.name)))
    }
}

impl std::fmt::Debug for SynthDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthDestination")
            .field("name", &self.name)
            .field("has_bank", &self.bank.is_some())
            .finish()
    }
}
