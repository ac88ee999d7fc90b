//! Hardware MIDI via midir. Requires the `midi-io` feature.

mod input;
mod output;

use std::sync::Arc;

use midir::{MidiInput, MidiOutput};

use crate::device::{MidiBackend, MidiDestination, MidiDeviceInfo, MidiInputConnection, PortDirection};
use crate::error::{Error, Result};
use crate::source::MidiSource;

pub use input::MidirInputConnection;
pub use output::MidirOutput;

/// [`MidiBackend`] over the platform MIDI API.
///
/// Ports are identified by their display name.
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn find(devices: Vec<MidiDeviceInfo>, device_id: &str) -> Result<MidiDeviceInfo> {
        devices
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::MidiDevice(format!("MIDI device '{device_id}' not found")))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("chorale")
    }
}

impl MidiBackend for MidirBackend {
    fn inputs(&self) -> Result<Vec<MidiDeviceInfo>> {
        let midi_input = MidiInput::new(&format!("{}-list", self.client_name))?;
        Ok(midi_input
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let name = midi_input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Input {index}"));
                MidiDeviceInfo::new(name.clone(), name, PortDirection::Input)
            })
            .collect())
    }

    fn outputs(&self) -> Result<Vec<MidiDeviceInfo>> {
        let midi_output = MidiOutput::new(&format!("{}-list", self.client_name))?;
        Ok(midi_output
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let name = midi_output
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Output {index}"));
                MidiDeviceInfo::new(name.clone(), name, PortDirection::Output)
            })
            .collect())
    }

    fn open_input(
        &self,
        device_id: &str,
        source: Arc<MidiSource>,
    ) -> Result<Box<dyn MidiInputConnection>> {
        let device = Self::find(self.inputs()?, device_id)?;
        let connection = MidirInputConnection::open(&self.client_name, device, source)?;
        Ok(Box::new(connection))
    }

    fn open_output(&self, device_id: &str) -> Result<Arc<dyn MidiDestination>> {
        let device = Self::find(self.outputs()?, device_id)?;
        Ok(Arc::new(MidirOutput::open(&self.client_name, device)?))
    }
}
