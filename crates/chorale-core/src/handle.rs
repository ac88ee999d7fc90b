//! Control-side handle to the mixer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chorale_synth::Voice;
use crossbeam_channel::{Sender, TrySendError};
use tracing::warn;

use crate::error::{Error, Result};
use crate::mixer::{MixerCommand, MixerShared};

/// Cheap to clone; every clone feeds the same mixer.
///
/// Sends never block. When the queue is full the command is dropped with a
/// warning and counted in [`dropped_commands`](Self::dropped_commands); only a
/// dropped mixer is an error.
#[derive(Clone)]
pub struct MixerHandle {
    tx: Sender<MixerCommand>,
    shared: Arc<MixerShared>,
}

impl MixerHandle {
    pub(crate) fn new(tx: Sender<MixerCommand>, shared: Arc<MixerShared>) -> Self {
        Self { tx, shared }
    }

    fn send(&self, command: MixerCommand) -> Result<()> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.dropped_commands.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Mixer command queue full, dropping command");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::MixerClosed),
        }
    }

    /// Hands a freshly built voice to the render side.
    pub fn start_voice(&self, voice: Voice) -> Result<()> {
        self.send(MixerCommand::Start(voice))
    }

    pub fn note_off(&self, channel: u8, note: u8) -> Result<()> {
        self.send(MixerCommand::NoteOff { channel, note })
    }

    /// `bend` is normalised, -1.0..=1.0.
    pub fn pitch_bend(&self, channel: u8, bend: f32) -> Result<()> {
        self.send(MixerCommand::PitchBend { channel, bend })
    }

    pub fn pressure(&self, channel: u8, pressure: f32) -> Result<()> {
        self.send(MixerCommand::Pressure { channel, pressure })
    }

    pub fn poly_pressure(&self, channel: u8, note: u8, pressure: f32) -> Result<()> {
        self.send(MixerCommand::PolyPressure {
            channel,
            note,
            pressure,
        })
    }

    pub fn timbre(&self, channel: u8, timbre: f32) -> Result<()> {
        self.send(MixerCommand::Timbre { channel, timbre })
    }

    /// Releases every voice on `channel`, or on all channels for `None`.
    pub fn all_notes_off(&self, channel: Option<u8>) -> Result<()> {
        self.send(MixerCommand::AllNotesOff { channel })
    }

    /// Fast-fades every voice on `channel`, or on all channels for `None`.
    pub fn all_sound_off(&self, channel: Option<u8>) -> Result<()> {
        self.send(MixerCommand::AllSoundOff { channel })
    }

    /// Takes effect on the next render call.
    pub fn set_master_gain(&self, gain: f32) {
        self.shared
            .master_gain
            .store(gain.max(0.0), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        self.shared.master_gain.load(Ordering::Relaxed)
    }

    /// Voice count as of the last render call, fading voices included.
    pub fn active_voices(&self) -> usize {
        self.shared.active_voices.load(Ordering::Relaxed)
    }

    pub fn dropped_commands(&self) -> u64 {
        self.shared.dropped_commands.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f32 {
        self.shared.sample_rate
    }
}

impl std::fmt::Debug for MixerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerHandle")
            .field("queued", &self.tx.len())
            .field("active_voices", &self.active_voices())
            .finish()
    }
}
