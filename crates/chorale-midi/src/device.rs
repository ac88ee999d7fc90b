//! Device handles and the backend abstraction.
//!
//! Routes only see two things about the outside world: a [`MidiSource`] they
//! can subscribe to, and a [`MidiDestination`] they can send to. Physical
//! ports, virtual ports and internal components (a synth, a recorder) all sit
//! behind these.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::{MidiMessage, SysExMessage};
use crate::source::MidiSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Identifies a physical endpoint as reported by backend enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MidiDeviceInfo {
    /// Backend-specific stable identifier.
    pub id: String,
    pub display_name: String,
    pub direction: PortDirection,
}

impl MidiDeviceInfo {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            direction,
        }
    }
}

/// Whether a destination is a physical output (accepts raw SysEx) or an
/// internal controllable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Physical,
    Internal,
}

/// Called when a destination fails outside of `send`, e.g. on a writer
/// thread.
pub type FailureCallback = Box<dyn Fn(&Error) + Send + Sync>;

/// Final hop of a route.
///
/// `send` is called on whichever thread emitted the message; implementations
/// must not block for long. An `Err` faults the calling route permanently.
pub trait MidiDestination: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> DestinationKind {
        DestinationKind::Internal
    }

    fn send(&self, message: &MidiMessage) -> Result<()>;

    /// Only called when `kind()` is `Physical`.
    fn send_sysex(&self, _message: &SysExMessage) -> Result<()> {
        Ok(())
    }

    /// Registers a callback for failures detected after `send` returned.
    /// Destinations that fail synchronously ignore it.
    fn on_failure(&self, _callback: FailureCallback) {}
}

impl<T: MidiDestination + ?Sized> MidiDestination for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> DestinationKind {
        (**self).kind()
    }

    fn send(&self, message: &MidiMessage) -> Result<()> {
        (**self).send(message)
    }

    fn send_sysex(&self, message: &SysExMessage) -> Result<()> {
        (**self).send_sysex(message)
    }

    fn on_failure(&self, callback: FailureCallback) {
        (**self).on_failure(callback)
    }
}

/// An open input port. Dropping it closes the port.
pub trait MidiInputConnection: Send {
    fn device(&self) -> &MidiDeviceInfo;

    fn close(self: Box<Self>);
}

/// Device enumeration and open/close.
pub trait MidiBackend: Send + Sync {
    fn inputs(&self) -> Result<Vec<MidiDeviceInfo>>;

    fn outputs(&self) -> Result<Vec<MidiDeviceInfo>>;

    /// Opens an input port; every received message is emitted on `source`.
    fn open_input(
        &self,
        device_id: &str,
        source: Arc<MidiSource>,
    ) -> Result<Box<dyn MidiInputConnection>>;

    fn open_output(&self, device_id: &str) -> Result<Arc<dyn MidiDestination>>;
}
