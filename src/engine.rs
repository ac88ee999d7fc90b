//! ChoraleEngine that ties routing, synthesis and output together.

use std::sync::Arc;

use chorale_core::{Mixer, MixerHandle, SynthDestination};
use chorale_midi::{
    MidiBackend, MidiDestination, MidiDeviceInfo, MidiInputConnection, MidiModifier, MidiRoute,
    MidiRouter, MidiSource,
};
use parking_lot::Mutex;
use tracing::{debug, info};

#[cfg(feature = "std")]
use chorale_core::PlaybackDevice;

use crate::{ChoraleEngineBuilder, EngineConfig, Error, Result};

/// Main engine.
///
/// Owns the route registry, the synth destination every channel plays
/// through, and the render side of the mixer until it is handed to an audio
/// device (or taken for custom driving with [`take_mixer`](Self::take_mixer)).
///
/// # Example
///
/// ```
/// use chorale::prelude::*;
///
/// let mut engine = ChoraleEngine::builder().build()?;
/// let keyboard = MidiSource::new("keyboard");
/// engine.connect_source(&keyboard)?;
///
/// keyboard.emit_message(MidiMessage::note_on(0, 60, 100));
/// let mut out = vec![0.0f32; 512];
/// engine.render(&mut out, 256)?;
/// assert_eq!(engine.mixer().active_voices(), 1);
/// # Ok::<(), chorale::Error>(())
/// ```
pub struct ChoraleEngine {
    config: EngineConfig,
    router: MidiRouter,
    synth: Arc<SynthDestination>,
    handle: MixerHandle,
    mixer: Option<Mixer>,
    backend: Option<Arc<dyn MidiBackend>>,
    inputs: Mutex<Vec<Box<dyn MidiInputConnection>>>,
    #[cfg(feature = "std")]
    device: Option<PlaybackDevice>,
}

impl ChoraleEngine {
    pub fn builder() -> ChoraleEngineBuilder {
        ChoraleEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        config: EngineConfig,
        router: MidiRouter,
        synth: Arc<SynthDestination>,
        handle: MixerHandle,
        mixer: Mixer,
        backend: Option<Arc<dyn MidiBackend>>,
    ) -> Self {
        Self {
            config,
            router,
            synth,
            handle,
            mixer: Some(mixer),
            backend,
            inputs: Mutex::new(Vec::new()),
            #[cfg(feature = "std")]
            device: None,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.mixer.sample_rate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &MidiRouter {
        &self.router
    }

    pub fn synth(&self) -> &Arc<SynthDestination> {
        &self.synth
    }

    /// Control handle for the mixer; works whoever drives the render side.
    pub fn mixer(&self) -> &MixerHandle {
        &self.handle
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Routes `source` into the synth through the configured chain and starts
    /// the route.
    pub fn connect_source(&self, source: &Arc<MidiSource>) -> Result<Arc<MidiRoute>> {
        let route = self
            .router
            .connect(source, Arc::clone(&self.synth) as Arc<dyn MidiDestination>);
        for preset in &self.config.synth_chain {
            route.add_processor(MidiModifier::from_preset(preset)?);
        }
        route.start();
        Ok(route)
    }

    /// Routes `source` to any destination and starts the route.
    pub fn connect(
        &self,
        source: &Arc<MidiSource>,
        destination: Arc<dyn MidiDestination>,
    ) -> Arc<MidiRoute> {
        let route = self.router.connect(source, destination);
        route.start();
        route
    }

    // =========================================================================
    // MIDI devices
    // =========================================================================

    fn backend(&self) -> Result<&Arc<dyn MidiBackend>> {
        self.backend.as_ref().ok_or(Error::NoBackend)
    }

    pub fn list_inputs(&self) -> Result<Vec<MidiDeviceInfo>> {
        Ok(self.backend()?.inputs()?)
    }

    pub fn list_outputs(&self) -> Result<Vec<MidiDeviceInfo>> {
        Ok(self.backend()?.outputs()?)
    }

    /// Opens a hardware input and returns the source it emits on. The port
    /// stays open until [`close_inputs`](Self::close_inputs) or drop.
    pub fn open_input(&self, device_id: &str) -> Result<Arc<MidiSource>> {
        let source = MidiSource::new(device_id);
        let connection = self.backend()?.open_input(device_id, Arc::clone(&source))?;
        info!("Opened MIDI input '{}'", connection.device().display_name);
        self.inputs.lock().push(connection);
        Ok(source)
    }

    pub fn open_output(&self, device_id: &str) -> Result<Arc<dyn MidiDestination>> {
        let output = self.backend()?.open_output(device_id)?;
        info!("Opened MIDI output '{}'", output.name());
        Ok(output)
    }

    pub fn close_inputs(&self) {
        for connection in self.inputs.lock().drain(..) {
            debug!("Closing MIDI input '{}'", connection.device().display_name);
            connection.close();
        }
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Renders interleaved stereo into `out` when no audio device owns the
    /// mixer.
    pub fn render(&mut self, out: &mut [f32], frames: usize) -> Result<usize> {
        let mixer = self.mixer.as_mut().ok_or(Error::MixerInUse)?;
        Ok(mixer.render(out, frames))
    }

    /// Hands the render side to the caller, e.g. for a custom audio driver.
    pub fn take_mixer(&mut self) -> Option<Mixer> {
        self.mixer.take()
    }

    /// Fast-fades every voice on every channel.
    pub fn panic(&self) -> Result<()> {
        Ok(self.handle.all_sound_off(None)?)
    }

    /// Starts audio output on `device_index` (default device for `None`).
    /// Build the engine at the device's rate, see
    /// [`PlaybackDevice::default_config`].
    #[cfg(feature = "std")]
    pub fn start_audio(&mut self, device_index: Option<usize>) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let mixer = self.mixer.take().ok_or(Error::MixerInUse)?;
        let mut device = PlaybackDevice::open(mixer, device_index)?;
        device.play()?;
        info!("Audio output running on '{}'", device.device_name());
        self.device = Some(device);
        Ok(())
    }

    /// Stops and closes the audio device. The mixer goes with it.
    #[cfg(feature = "std")]
    pub fn stop_audio(&mut self) {
        if let Some(device) = self.device.take() {
            info!("Audio output stopped on '{}'", device.device_name());
        }
    }

    #[cfg(feature = "std")]
    pub fn is_audio_running(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_playing())
    }
}

impl Drop for ChoraleEngine {
    fn drop(&mut self) {
        self.close_inputs();
        self.router.clear();
    }
}

impl std::fmt::Debug for ChoraleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChoraleEngine")
            .field("sample_rate", &self.sample_rate())
            .field("routes", &self.router.len())
            .field("mixer_attached", &self.mixer.is_some())
            .finish()
    }
}
