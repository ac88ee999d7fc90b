//! Real-time rendering for Chorale: the voice mixer and its audio output.
//!
//! # Primary API
//!
//! - [`Mixer`] / [`MixerHandle`]: render-side voice pool and its control handle
//! - [`SynthDestination`]: MIDI destination that starts and shapes voices
//! - [`PlaybackDevice`]: CPAL output stream driven by a mixer (`"std"`)
//!
//! # Example
//!
//! ```
//! use chorale_core::{Mixer, MixerConfig, SynthDestination};
//! use chorale_midi::{MidiDestination, MidiMessage};
//! use chorale_synth::{Instrument, VoiceDefinition};
//!
//! let (mut mixer, handle) = Mixer::new(MixerConfig::default())?;
//! let lead = Instrument::single("lead", VoiceDefinition::builder("lead").build()?);
//! let synth = SynthDestination::new("synth", handle, lead);
//!
//! synth.send(&MidiMessage::note_on(0, 60, 100)).unwrap();
//! let mut out = vec![0.0f32; 512];
//! mixer.render(&mut out, 256);
//! assert_eq!(mixer.voice_count(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub use error::{Error, Result};

mod mixer;
pub use mixer::{Mixer, MixerConfig};

mod handle;
pub use handle::MixerHandle;

mod synth;
pub use synth::SynthDestination;

#[cfg(feature = "std")]
mod output;

#[cfg(feature = "std")]
pub use output::PlaybackDevice;
