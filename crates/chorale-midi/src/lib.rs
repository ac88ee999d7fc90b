//! MIDI routing for the Chorale engine.
//!
//! Sources emit messages to routes; each route runs its modifier chain and
//! delivers to a destination (a hardware port or an internal component such
//! as a synth). Chains are published as immutable snapshots, so edits never
//! block delivery.
//!
//! Feature gates: `midi-io` (hardware ports via midir).

pub mod error;
pub use error::{Error, Result};

mod message;
pub use message::{Command, MidiMessage, MidiPacket, SysExMessage, Timestamp};

mod device;
pub use device::{
    DestinationKind, FailureCallback, MidiBackend, MidiDestination, MidiDeviceInfo, MidiInputConnection,
    PortDirection,
};

mod source;
pub use source::{ListenerId, MidiListener, MidiSource};

pub mod modifier;
pub use modifier::{
    apply_chain, MessageTransform, MidiModifier, ModifierConfig, ModifierId, ModifierOutput,
    ModifierPreset,
};

mod route;
pub use route::{fault_channel, MidiRoute, RouteFault, RouteId, RouteObserver, RouteStats};

mod router;
pub use router::MidiRouter;

mod recorder;
pub use recorder::{read_smf, write_smf, MidiRecorder, RecordedEvent};

#[cfg(feature = "midi-io")]
mod io;

#[cfg(feature = "midi-io")]
pub use io::{MidirBackend, MidirInputConnection, MidirOutput};
