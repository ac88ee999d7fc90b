//! Physical MIDI input feeding a [`MidiSource`].
//!
//! Each open port runs on a dedicated thread that owns the midir connection;
//! the handle returned to the caller only holds the shutdown channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use midir::{Ignore, MidiInput};
use tracing::{debug, trace};

use crate::device::{MidiDeviceInfo, MidiInputConnection};
use crate::error::{Error, Result};
use crate::message::MidiPacket;
use crate::source::MidiSource;

pub struct MidirInputConnection {
    device: MidiDeviceInfo,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MidirInputConnection {
    pub(crate) fn open(
        client_name: &str,
        device: MidiDeviceInfo,
        source: Arc<MidiSource>,
    ) -> Result<Self> {
        let (shutdown_sender, shutdown_receiver) = bounded::<()>(1);
        let (ready_sender, ready_receiver) = bounded::<Result<()>>(1);

        let client = client_name.to_string();
        let port_name = device.display_name.clone();
        let thread = thread::Builder::new()
            .name(format!("midi-in:{}", device.display_name))
            .spawn(move || {
                let connection = match connect(&client, &port_name, source) {
                    Ok(connection) => connection,
                    Err(e) => {
                        let _ = ready_sender.send(Err(e));
                        return;
                    }
                };
                let _ = ready_sender.send(Ok(()));
                // Blocks until the handle sends or is dropped
                let _ = shutdown_receiver.recv();
                connection.close();
                debug!("Closed MIDI input '{}'", port_name);
            })?;

        ready_receiver
            .recv()
            .map_err(|_| Error::MidiDevice("MIDI input thread exited".to_string()))??;
        debug!("Opened MIDI input '{}'", device.display_name);

        Ok(Self {
            device,
            shutdown: Some(shutdown_sender),
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl MidiInputConnection for MidirInputConnection {
    fn device(&self) -> &MidiDeviceInfo {
        &self.device
    }

    fn close(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for MidirInputConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connect(
    client_name: &str,
    port_name: &str,
    source: Arc<MidiSource>,
) -> Result<midir::MidiInputConnection<()>> {
    let mut midi_input = MidiInput::new(client_name)?;
    midi_input.ignore(Ignore::TimeAndActiveSense);

    let ports = midi_input.ports();
    let port = ports
        .iter()
        .find(|p| midi_input.port_name(p).ok().as_deref() == Some(port_name))
        .ok_or_else(|| Error::MidiDevice(format!("MIDI input '{port_name}' not found")))?;

    let connection = midi_input.connect(
        port,
        "chorale-input",
        move |timestamp_us, bytes, _| match MidiPacket::from_bytes(bytes, timestamp_us) {
            Ok(packet) => source.emit(packet),
            Err(e) => trace!("Ignoring MIDI input {:02X?}: {}", bytes, e),
        },
        (),
    )?;
    Ok(connection)
}
