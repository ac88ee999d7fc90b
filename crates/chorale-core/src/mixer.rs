//! Render-side voice pool.
//!
//! The [`Mixer`] lives on the audio thread. It owns every sounding voice and
//! is the only place voices are dropped. Control threads talk to it through a
//! [`MixerHandle`] over a bounded channel; the mixer drains that channel at
//! the top of each render call with `try_recv`, so it never blocks.
//!
//! Nothing in here logs or takes a lock.

use std::f32::consts::FRAC_PI_4;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use chorale_synth::{choose_victim, StealPolicy, Voice, MAX_BLOCK_SIZE};
use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::handle::MixerHandle;

/// Killed voices keep their slot while they fade, so the pool holds more
/// voices than the polyphony limit.
const POOL_HEADROOM: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub sample_rate: f32,
    /// Most voices that may sound at once, not counting fading steal victims.
    pub max_voices: usize,
    pub steal_policy: StealPolicy,
    /// Capacity of the control to render command queue.
    pub queue_capacity: usize,
    pub master_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_voices: 32,
            steal_policy: StealPolicy::Oldest,
            queue_capacity: 1024,
            master_gain: 1.0,
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.max_voices == 0 {
            return Err(Error::InvalidConfig("polyphony must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacity must be at least 1".into()));
        }
        if !self.master_gain.is_finite() || self.master_gain < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "master gain must be finite and >= 0, got {}",
                self.master_gain
            )));
        }
        Ok(())
    }
}

/// Control to render messages.
#[allow(clippy::large_enum_variant)]
pub(crate) enum MixerCommand {
    Start(Voice),
    NoteOff { channel: u8, note: u8 },
    PitchBend { channel: u8, bend: f32 },
    Pressure { channel: u8, pressure: f32 },
    PolyPressure { channel: u8, note: u8, pressure: f32 },
    Timbre { channel: u8, timbre: f32 },
    /// `None` addresses every channel.
    AllNotesOff { channel: Option<u8> },
    AllSoundOff { channel: Option<u8> },
}

/// State both sides read without locking.
#[derive(Debug)]
pub(crate) struct MixerShared {
    pub(crate) sample_rate: f32,
    pub(crate) master_gain: AtomicF32,
    pub(crate) active_voices: AtomicUsize,
    pub(crate) dropped_commands: AtomicU64,
}

pub struct Mixer {
    voices: Vec<Voice>,
    pool_capacity: usize,
    max_voices: usize,
    steal_policy: StealPolicy,
    scratch: Box<[f32]>,
    commands: Receiver<MixerCommand>,
    shared: Arc<MixerShared>,
}

impl Mixer {
    /// Creates the render side and its control handle.
    pub fn new(config: MixerConfig) -> Result<(Mixer, MixerHandle)> {
        config.validate()?;
        let (tx, rx) = bounded(config.queue_capacity);
        let shared = Arc::new(MixerShared {
            sample_rate: config.sample_rate,
            master_gain: AtomicF32::new(config.master_gain),
            active_voices: AtomicUsize::new(0),
            dropped_commands: AtomicU64::new(0),
        });

        let pool_capacity = config.max_voices * POOL_HEADROOM;
        let mixer = Mixer {
            voices: Vec::with_capacity(pool_capacity),
            pool_capacity,
            max_voices: config.max_voices,
            steal_policy: config.steal_policy,
            scratch: vec![0.0; MAX_BLOCK_SIZE].into_boxed_slice(),
            commands: rx,
            shared: Arc::clone(&shared),
        };
        Ok((mixer, MixerHandle::new(tx, shared)))
    }

    pub fn sample_rate(&self) -> f32 {
        self.shared.sample_rate
    }

    /// Voices still in the pool, fading ones included.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Renders up to `frames` interleaved stereo frames into `out` and
    /// returns how many were written. Always fills the full request; silence
    /// when nothing is playing.
    pub fn render(&mut self, out: &mut [f32], frames: usize) -> usize {
        self.drain_commands();

        let frames = frames.min(out.len() / 2);
        let out = &mut out[..frames * 2];
        out.fill(0.0);

        for block in out.chunks_mut(MAX_BLOCK_SIZE * 2) {
            let block_frames = block.len() / 2;
            let mono = &mut self.scratch[..block_frames];

            for voice in self.voices.iter_mut() {
                if voice.is_finished() {
                    continue;
                }
                let produced = voice.render(mono);
                let (left, right) = pan_gains(voice.pan());
                for (frame, &sample) in block.chunks_exact_mut(2).zip(&mono[..produced]) {
                    frame[0] += sample * left;
                    frame[1] += sample * right;
                }
            }
        }

        self.voices.retain(|voice| !voice.is_finished());

        let gain = self.shared.master_gain.load(Ordering::Relaxed);
        if gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }

        self.shared
            .active_voices
            .store(self.voices.len(), Ordering::Relaxed);
        frames
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Start(voice) => self.start_voice(voice),
            MixerCommand::NoteOff { channel, note } => {
                for voice in self.voices.iter_mut().filter(|v| {
                    v.channel() == channel && v.note() == note && !v.is_releasing()
                }) {
                    voice.note_off();
                }
            }
            MixerCommand::PitchBend { channel, bend } => {
                for voice in self.on_channel(Some(channel)) {
                    voice.set_pitch_bend(bend);
                }
            }
            MixerCommand::Pressure { channel, pressure } => {
                for voice in self.on_channel(Some(channel)) {
                    voice.set_pressure(pressure);
                }
            }
            MixerCommand::PolyPressure {
                channel,
                note,
                pressure,
            } => {
                for voice in self.on_channel(Some(channel)).filter(|v| v.note() == note) {
                    voice.set_pressure(pressure);
                }
            }
            MixerCommand::Timbre { channel, timbre } => {
                for voice in self.on_channel(Some(channel)) {
                    voice.set_timbre(timbre);
                }
            }
            MixerCommand::AllNotesOff { channel } => {
                for voice in self.on_channel(channel) {
                    voice.note_off();
                }
            }
            MixerCommand::AllSoundOff { channel } => {
                for voice in self.on_channel(channel) {
                    voice.kill();
                }
            }
        }
    }

    fn on_channel(&mut self, channel: Option<u8>) -> impl Iterator<Item = &mut Voice> + '_ {
        self.voices
            .iter_mut()
            .filter(move |v| channel.map_or(true, |ch| v.channel() == ch))
    }

    fn start_voice(&mut self, voice: Voice) {
        let sounding = self
            .voices
            .iter()
            .filter(|v| !v.is_killed() && !v.is_finished())
            .count();

        if sounding >= self.max_voices {
            match choose_victim(&self.voices, self.steal_policy) {
                Some(index) => self.voices[index].kill(),
                None => return,
            }
        }

        if self.voices.len() >= self.pool_capacity {
            // No free slot for the fade tail: cut the oldest killed voice now
            let oldest_killed = self
                .voices
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_killed() || v.is_finished())
                .min_by_key(|(_, v)| v.id())
                .map(|(index, _)| index);
            match oldest_killed {
                Some(index) => {
                    self.voices.swap_remove(index);
                }
                None => return,
            }
        }

        self.voices.push(voice);
        self.shared
            .active_voices
            .store(self.voices.len(), Ordering::Relaxed);
    }
}

/// Equal-power pan law, `pan` in -1.0..=1.0.
#[inline]
fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chorale_synth::{EnvelopeConfig, NoteContext, VoiceDefinition, Waveform};

    const SR: f32 = 48_000.0;

    fn mixer(max_voices: usize, steal_policy: StealPolicy) -> (Mixer, MixerHandle) {
        Mixer::new(MixerConfig {
            sample_rate: SR,
            max_voices,
            steal_policy,
            ..MixerConfig::default()
        })
        .unwrap()
    }

    fn voice(note: u8) -> Voice {
        VoiceDefinition::builder("t")
            .waveform(Waveform::Sine)
            .envelope(EnvelopeConfig::new(0.0, 0.0, 1.0, 0.01))
            .build()
            .unwrap()
            .create_voice(&NoteContext::new(note, 100, 0, SR))
    }

    #[test]
    fn test_config_validation() {
        assert!(MixerConfig::default().validate().is_ok());
        let zero = MixerConfig {
            max_voices: 0,
            ..MixerConfig::default()
        };
        assert!(matches!(Mixer::new(zero), Err(Error::InvalidConfig(_))));
        let no_queue = MixerConfig {
            queue_capacity: 0,
            ..MixerConfig::default()
        };
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn test_silence_when_idle() {
        let (mut mixer, _handle) = mixer(4, StealPolicy::Oldest);
        let mut out = vec![1.0f32; 512];
        assert_eq!(mixer.render(&mut out, 256), 256);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_frames_clamped_to_buffer() {
        let (mut mixer, _handle) = mixer(4, StealPolicy::Oldest);
        let mut out = vec![0.0f32; 100];
        assert_eq!(mixer.render(&mut out, 4096), 50);
    }

    #[test]
    fn test_start_render_release_remove() {
        let (mut mixer, handle) = mixer(4, StealPolicy::Oldest);
        handle.start_voice(voice(69)).unwrap();
        let mut out = vec![0.0f32; 512];
        mixer.render(&mut out, 256);
        assert_eq!(mixer.voice_count(), 1);
        assert_eq!(handle.active_voices(), 1);
        assert!(out.iter().any(|s| s.abs() > 0.1));

        handle.note_off(0, 69).unwrap();
        // 10 ms release
        for _ in 0..3 {
            mixer.render(&mut out, 256);
        }
        assert_eq!(mixer.voice_count(), 0);
        assert_eq!(handle.active_voices(), 0);
    }

    #[test]
    fn test_centre_pan_is_equal_power() {
        let (l, r) = pan_gains(0.0);
        assert_relative_eq!(l, r);
        assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-6);
        let (l, r) = pan_gains(-1.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-6);
        assert_relative_eq!(r, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_master_gain() {
        let (mut mixer, handle) = mixer(4, StealPolicy::Oldest);
        handle.set_master_gain(0.0);
        handle.start_voice(voice(60)).unwrap();
        let mut out = vec![0.0f32; 256];
        mixer.render(&mut out, 128);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(handle.master_gain(), 0.0);
    }

    #[test]
    fn test_steal_kills_oldest_and_keeps_limit() {
        let (mut mixer, handle) = mixer(2, StealPolicy::Oldest);
        for note in [60, 62, 64] {
            handle.start_voice(voice(note)).unwrap();
        }
        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out, 32);

        let sounding: Vec<u8> = mixer
            .voices()
            .iter()
            .filter(|v| !v.is_killed())
            .map(|v| v.note())
            .collect();
        assert_eq!(sounding, vec![62, 64]);

        // 1 ms fade, then the victim is gone
        mixer.render(&mut out, 32);
        assert_eq!(mixer.voice_count(), 2);
    }

    #[test]
    fn test_no_steal_drops_new_note() {
        let (mut mixer, handle) = mixer(1, StealPolicy::NoSteal);
        handle.start_voice(voice(60)).unwrap();
        handle.start_voice(voice(72)).unwrap();
        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out, 32);
        assert_eq!(mixer.voice_count(), 1);
        assert_eq!(mixer.voices()[0].note(), 60);
    }

    #[test]
    fn test_full_pool_cuts_fading_voice() {
        let (mut mixer, handle) = mixer(1, StealPolicy::Oldest);
        // Capacity is 2; the third start must evict a fading victim at once
        for note in [60, 62, 64] {
            handle.start_voice(voice(note)).unwrap();
        }
        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);
        assert!(mixer.voice_count() <= 2);
        let live: Vec<u8> = mixer
            .voices()
            .iter()
            .filter(|v| !v.is_killed())
            .map(|v| v.note())
            .collect();
        assert_eq!(live, vec![64]);
    }

    #[test]
    fn test_all_sound_off_by_channel() {
        let (mut mixer, handle) = mixer(8, StealPolicy::Oldest);
        let def = VoiceDefinition::builder("t")
            .envelope(EnvelopeConfig::new(0.0, 0.0, 1.0, 1.0))
            .build()
            .unwrap();
        handle
            .start_voice(def.create_voice(&NoteContext::new(60, 100, 0, SR)))
            .unwrap();
        handle
            .start_voice(def.create_voice(&NoteContext::new(60, 100, 1, SR)))
            .unwrap();
        handle.all_sound_off(Some(0)).unwrap();
        let mut out = vec![0.0f32; 256];
        mixer.render(&mut out, 128);
        assert_eq!(mixer.voice_count(), 1);
        assert_eq!(mixer.voices()[0].channel(), 1);

        handle.all_notes_off(None).unwrap();
        mixer.render(&mut out, 1);
        assert!(mixer.voices()[0].is_releasing());
    }

    #[test]
    fn test_controllers_reach_channel_voices() {
        let (mut mixer, handle) = mixer(8, StealPolicy::Oldest);
        handle.start_voice(voice(69)).unwrap();
        handle.pitch_bend(0, 1.0).unwrap();
        handle.pitch_bend(5, -1.0).unwrap();
        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);
        // Default range is two semitones
        assert_relative_eq!(
            mixer.voices()[0].frequency(),
            440.0 * 2.0f32.powf(2.0 / 12.0),
            epsilon = 1e-2
        );
    }
}
