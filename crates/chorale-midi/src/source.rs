//! MIDI source nodes.
//!
//! A source keeps an immutable dispatch table of listeners behind an
//! `ArcSwap`. Emitting loads the table once and calls every listener in
//! subscription order on the emitting thread; subscribing and unsubscribing
//! build a new table and publish it, serialised by a writer mutex that the
//! emit path never takes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::message::{MidiMessage, MidiPacket};

/// Unique identifier for a listener subscription.
pub type ListenerId = u64;

/// Anything that consumes a source's message stream (routes, recorders).
pub trait MidiListener: Send + Sync {
    fn listener_id(&self) -> ListenerId;

    fn on_packet(&self, packet: &MidiPacket);
}

pub(crate) fn next_listener_id() -> ListenerId {
    static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type DispatchTable = Vec<Arc<dyn MidiListener>>;

/// A physical input or a virtual emitter (sequencer, UI keyboard).
pub struct MidiSource {
    name: String,
    listeners: ArcSwap<DispatchTable>,
    write_lock: Mutex<()>,
}

impl MidiSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a listener. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn MidiListener>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.listeners.load();
        let id = listener.listener_id();
        if current.iter().any(|l| l.listener_id() == id) {
            return false;
        }
        let mut table = Vec::with_capacity(current.len() + 1);
        table.extend(current.iter().cloned());
        table.push(listener);
        self.listeners.store(Arc::new(table));
        tracing::debug!("Subscribed listener {} to source '{}'", id, self.name);
        true
    }

    /// Removes a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.listeners.load();
        if !current.iter().any(|l| l.listener_id() == id) {
            return false;
        }
        let table: DispatchTable = current
            .iter()
            .filter(|l| l.listener_id() != id)
            .cloned()
            .collect();
        self.listeners.store(Arc::new(table));
        tracing::debug!("Unsubscribed listener {} from source '{}'", id, self.name);
        true
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_subscribed(&self, id: ListenerId) -> bool {
        self.listeners.load().iter().any(|l| l.listener_id() == id)
    }

    /// Delivers a packet to every current listener.
    pub fn emit(&self, packet: impl Into<MidiPacket>) {
        let packet = packet.into();
        let table = self.listeners.load();
        for listener in table.iter() {
            listener.on_packet(&packet);
        }
    }

    /// Convenience for channel messages.
    #[inline]
    pub fn emit_message(&self, message: MidiMessage) {
        self.emit(MidiPacket::Channel(message));
    }
}

impl std::fmt::Debug for MidiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiSource")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
