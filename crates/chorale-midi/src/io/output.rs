//! Physical MIDI output as a route destination.
//!
//! The midir connection lives on its own thread; `send` only enqueues bytes.
//! A write failure on that thread is latched, reported at once to every route
//! registered through `on_failure`, and returned by any later `send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::device::{DestinationKind, FailureCallback, MidiDestination, MidiDeviceInfo};
use crate::error::{Error, Result};
use crate::message::{MidiMessage, SysExMessage};

const OUTPUT_QUEUE_CAPACITY: usize = 1024;

enum OutputCommand {
    Channel([u8; 3], usize),
    SysEx(Arc<[u8]>),
    Shutdown,
}

impl OutputCommand {
    fn bytes(&self) -> &[u8] {
        match self {
            OutputCommand::Channel(bytes, len) => &bytes[..*len],
            OutputCommand::SysEx(bytes) => bytes,
            OutputCommand::Shutdown => &[],
        }
    }
}

/// Write failure shared between the writer thread and the handle.
#[derive(Default)]
struct FailureLatch {
    failed: AtomicBool,
    callbacks: Mutex<Vec<FailureCallback>>,
}

impl FailureLatch {
    fn is_tripped(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Latches the failure and notifies every registered callback once.
    fn trip(&self, error: &Error) {
        let callbacks = {
            let mut callbacks = self.callbacks.lock();
            if self.failed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        for callback in &callbacks {
            callback(error);
        }
    }

    /// Runs `callback` immediately if already tripped.
    fn register(&self, callback: FailureCallback, error: impl FnOnce() -> Error) {
        let mut callbacks = self.callbacks.lock();
        if self.is_tripped() {
            drop(callbacks);
            callback(&error());
        } else {
            callbacks.push(callback);
        }
    }
}

pub struct MidirOutput {
    device: MidiDeviceInfo,
    command_sender: Sender<OutputCommand>,
    latch: Arc<FailureLatch>,
}

impl MidirOutput {
    pub(crate) fn open(client_name: &str, device: MidiDeviceInfo) -> Result<Self> {
        let (command_sender, command_receiver) = bounded(OUTPUT_QUEUE_CAPACITY);
        let (ready_sender, ready_receiver) = bounded(1);
        let latch = Arc::new(FailureLatch::default());

        let thread_latch = Arc::clone(&latch);
        let client = client_name.to_string();
        let port_name = device.display_name.clone();
        thread::Builder::new()
            .name(format!("midi-out:{}", device.display_name))
            .spawn(move || match connect(&client, &port_name) {
                Ok(connection) => {
                    let _ = ready_sender.send(Ok(()));
                    output_thread(connection, command_receiver, thread_latch, port_name);
                }
                Err(e) => {
                    let _ = ready_sender.send(Err(e));
                }
            })?;

        ready_receiver
            .recv()
            .map_err(|_| Error::MidiDevice("MIDI output thread exited".to_string()))??;
        debug!("Opened MIDI output '{}'", device.display_name);

        Ok(Self {
            device,
            command_sender,
            latch,
        })
    }

    pub fn device(&self) -> &MidiDeviceInfo {
        &self.device
    }

    fn enqueue(&self, command: OutputCommand) -> Result<()> {
        if self.latch.is_tripped() {
            return Err(Error::Disconnected(self.device.display_name.clone()));
        }
        match self.command_sender.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Send(format!(
                "output queue for '{}' is full",
                self.device.display_name
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Disconnected(self.device.display_name.clone()))
            }
        }
    }
}

impl MidiDestination for MidirOutput {
    fn name(&self) -> &str {
        &self.device.display_name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Physical
    }

    fn send(&self, message: &MidiMessage) -> Result<()> {
        let (bytes, len) = message.to_bytes();
        self.enqueue(OutputCommand::Channel(bytes, len))
    }

    fn send_sysex(&self, message: &SysExMessage) -> Result<()> {
        self.enqueue(OutputCommand::SysEx(Arc::from(message.bytes())))
    }

    fn on_failure(&self, callback: FailureCallback) {
        let name = self.device.display_name.clone();
        self.latch.register(callback, move || Error::Disconnected(name));
    }
}

impl Drop for MidirOutput {
    fn drop(&mut self) {
        let _ = self.command_sender.send(OutputCommand::Shutdown);
    }
}

fn connect(client_name: &str, port_name: &str) -> Result<MidiOutputConnection> {
    let midi_output = MidiOutput::new(client_name)?;
    let ports = midi_output.ports();
    let port = ports
        .iter()
        .find(|p| midi_output.port_name(p).ok().as_deref() == Some(port_name))
        .ok_or_else(|| Error::MidiDevice(format!("MIDI output '{port_name}' not found")))?;
    Ok(midi_output.connect(port, "chorale-output")?)
}

fn output_thread(
    mut connection: MidiOutputConnection,
    command_receiver: Receiver<OutputCommand>,
    latch: Arc<FailureLatch>,
    port_name: String,
) {
    for command in command_receiver.iter() {
        if let OutputCommand::Shutdown = command {
            break;
        }
        if let Err(e) = connection.send(command.bytes()) {
            warn!("MIDI output write to '{}' failed: {}", port_name, e);
            latch.trip(&Error::from(e));
            break;
        }
    }
    connection.close();
}
