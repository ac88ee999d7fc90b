//! A route: source → modifier chain → destination.
//!
//! # Architecture
//!
//! ```text
//! Control thread                         Emitting thread (MIDI input / sequencer)
//!     │                                        │
//!     ▼                                        ▼
//! ┌──────────────────────┐            ┌──────────────────────────┐
//! │ add/insert/remove    │──ArcSwap──▶│ process()                │
//! │ (Mutex, writers only)│            │ - one chain snapshot     │
//! │ - clone chain        │            │ - apply enabled modifiers│
//! │ - publish new Vec    │            │ - send to destination    │
//! └──────────────────────┘            └──────────────────────────┘
//! ```
//!
//! A traversal loads the chain once, so a modifier added or removed while a
//! message is in flight only affects the next message.
//!
//! Failure is fail-stop: the first destination error marks the route faulted,
//! notifies observers, and every later message is dropped. Errors raised off
//! the delivery path arrive through [`MidiDestination::on_failure`]. A faulted route is
//! never healed in place; [`MidiRoute::rebuild`] produces a fresh one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use crate::device::{DestinationKind, MidiDestination};
use crate::error::Error;
use crate::message::MidiPacket;
use crate::modifier::{apply_chain, MidiModifier, ModifierId, ModifierOutput, ModifierPreset};
use crate::source::{next_listener_id, ListenerId, MidiListener, MidiSource};

pub type RouteId = ListenerId;

type Chain = Vec<Arc<MidiModifier>>;

/// Reported once, when a route faults.
#[derive(Debug, Clone)]
pub struct RouteFault {
    pub route: RouteId,
    pub source: String,
    pub destination: String,
    pub reason: String,
}

/// Receives route faults. Called on the thread that hit the failure.
pub trait RouteObserver: Send + Sync {
    fn route_faulted(&self, fault: &RouteFault);
}

impl<F> RouteObserver for F
where
    F: Fn(&RouteFault) + Send + Sync,
{
    fn route_faulted(&self, fault: &RouteFault) {
        self(fault)
    }
}

/// Observer that forwards faults into a bounded channel.
pub fn fault_channel(capacity: usize) -> (Arc<dyn RouteObserver>, Receiver<RouteFault>) {
    let (tx, rx) = bounded(capacity);
    let observer = move |fault: &RouteFault| {
        if tx.try_send(fault.clone()).is_err() {
            tracing::debug!("Route fault channel full, dropping report for route {}", fault.route);
        }
    };
    (Arc::new(observer), rx)
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub delivered: u64,
    pub dropped: u64,
}

pub struct MidiRoute {
    id: RouteId,
    source: Arc<MidiSource>,
    destination: Arc<dyn MidiDestination>,
    chain: ArcSwap<Chain>,
    /// Serialises chain writers. Never taken by `process`.
    chain_lock: Mutex<()>,
    observers: ArcSwap<Vec<Arc<dyn RouteObserver>>>,
    faulted: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl MidiRoute {
    /// Creates a stopped route with an empty chain.
    pub fn new(source: Arc<MidiSource>, destination: Arc<dyn MidiDestination>) -> Arc<Self> {
        Self::with_chain(source, destination, Vec::new(), Vec::new())
    }

    fn with_chain(
        source: Arc<MidiSource>,
        destination: Arc<dyn MidiDestination>,
        chain: Chain,
        observers: Vec<Arc<dyn RouteObserver>>,
    ) -> Arc<Self> {
        let route = Arc::new(Self {
            id: next_listener_id(),
            source,
            destination,
            chain: ArcSwap::from_pointee(chain),
            chain_lock: Mutex::new(()),
            observers: ArcSwap::from_pointee(observers),
            faulted: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let weak = Arc::downgrade(&route);
        route.destination.on_failure(Box::new(move |error| {
            if let Some(route) = weak.upgrade() {
                route.fault(error);
            }
        }));
        route
    }

    #[inline]
    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn source(&self) -> &Arc<MidiSource> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn MidiDestination> {
        &self.destination
    }

    /// Subscribes to the source. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let started = self.source.subscribe(self.clone());
        if started {
            tracing::debug!(
                "Route {} started: '{}' -> '{}'",
                self.id,
                self.source.name(),
                self.destination.name()
            );
        }
        started
    }

    /// Unsubscribes from the source. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let stopped = self.source.unsubscribe(self.id);
        if stopped {
            tracing::debug!("Route {} stopped", self.id);
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.source.is_subscribed(self.id)
    }

    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RouteStats {
        RouteStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Current chain snapshot.
    pub fn processors(&self) -> Arc<Chain> {
        self.chain.load_full()
    }

    /// Persistable description of the chain. Closure modifiers are skipped.
    pub fn presets(&self) -> Vec<ModifierPreset> {
        self.chain.load().iter().filter_map(|m| m.preset()).collect()
    }

    pub fn add_processor(&self, modifier: Arc<MidiModifier>) {
        self.update_chain(|chain| chain.push(modifier));
    }

    /// Inserts at `index`, clamped to the chain length.
    pub fn insert_processor(&self, index: usize, modifier: Arc<MidiModifier>) {
        self.update_chain(|chain| {
            let index = index.min(chain.len());
            chain.insert(index, modifier);
        });
    }

    pub fn remove_processor(&self, id: ModifierId) -> Option<Arc<MidiModifier>> {
        let mut removed = None;
        self.update_chain(|chain| {
            if let Some(pos) = chain.iter().position(|m| m.id() == id) {
                removed = Some(chain.remove(pos));
            }
        });
        removed
    }

    pub fn clear_processors(&self) {
        self.update_chain(|chain| chain.clear());
    }

    fn update_chain(&self, edit: impl FnOnce(&mut Chain)) {
        let _guard = self.chain_lock.lock();
        let mut chain: Chain = self.chain.load().as_ref().clone();
        edit(&mut chain);
        self.chain.store(Arc::new(chain));
    }

    pub fn add_observer(&self, observer: Arc<dyn RouteObserver>) {
        let _guard = self.chain_lock.lock();
        let mut observers = self.observers.load().as_ref().clone();
        observers.push(observer);
        self.observers.store(Arc::new(observers));
    }

    /// Delivers one packet. Called by the source on the emitting thread.
    pub fn process(&self, packet: &MidiPacket) {
        if self.is_faulted() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match packet {
            MidiPacket::SysEx(sysex) => {
                if self.destination.kind() != DestinationKind::Physical {
                    tracing::trace!(
                        "Route {}: dropping SysEx for internal destination '{}'",
                        self.id,
                        self.destination.name()
                    );
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                match self.destination.send_sysex(sysex) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => self.fault(&e),
                }
            }
            MidiPacket::Channel(message) => {
                let mut out = ModifierOutput::new();
                {
                    let chain = self.chain.load();
                    apply_chain(&chain, *message, &mut out);
                }

                for message in &out {
                    if self.is_faulted() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    match self.destination.send(message) {
                        Ok(()) => {
                            self.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => self.fault(&e),
                    }
                }
            }
        }
    }

    fn fault(&self, error: &Error) {
        if self.faulted.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!(
            "Route {} faulted ('{}' -> '{}'): {}",
            self.id,
            self.source.name(),
            self.destination.name(),
            error
        );
        let fault = RouteFault {
            route: self.id,
            source: self.source.name().to_string(),
            destination: self.destination.name().to_string(),
            reason: error.to_string(),
        };
        for observer in self.observers.load().iter() {
            observer.route_faulted(&fault);
        }
    }

    /// A fresh, stopped, unfaulted route with the same endpoints, chain and
    /// observers, and a new id.
    pub fn rebuild(&self) -> Arc<Self> {
        Self::with_chain(
            self.source.clone(),
            self.destination.clone(),
            self.chain.load().as_ref().clone(),
            self.observers.load().as_ref().clone(),
        )
    }
}

impl MidiListener for MidiRoute {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn on_packet(&self, packet: &MidiPacket) {
        self.process(packet);
    }
}

impl std::fmt::Debug for MidiRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiRoute")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("destination", &self.destination.name())
            .field("processors", &self.chain.load().len())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MidiMessage, SysExMessage};
    use crate::modifier::{Transpose, VelocityScale};

    #[derive(Default)]
    struct Collector {
        kind: Option<DestinationKind>,
        fail_after: Option<usize>,
        messages: Mutex<Vec<MidiMessage>>,
        sysex: Mutex<Vec<SysExMessage>>,
    }

    impl MidiDestination for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        fn kind(&self) -> DestinationKind {
            self.kind.unwrap_or(DestinationKind::Internal)
        }

        fn send(&self, message: &MidiMessage) -> crate::Result<()> {
            let mut messages = self.messages.lock();
            if self.fail_after == Some(messages.len()) {
                return Err(Error::Send("device unplugged".into()));
            }
            messages.push(*message);
            Ok(())
        }

        fn send_sysex(&self, message: &SysExMessage) -> crate::Result<()> {
            self.sysex.lock().push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn test_route_applies_chain() {
        let source = MidiSource::new("in");
        let dest = Arc::new(Collector::default());
        let route = MidiRoute::new(source.clone(), dest.clone());
        route.add_processor(MidiModifier::new(Transpose::new(12)));
        route.add_processor(MidiModifier::new(VelocityScale::new(0.5).unwrap()));

        // Not started yet: nothing delivered
        source.emit_message(MidiMessage::note_on(0, 60, 100));
        assert!(dest.messages.lock().is_empty());

        assert!(route.start());
        assert!(!route.start());
        source.emit_message(MidiMessage::note_on(0, 60, 100));
        assert_eq!(*dest.messages.lock(), vec![MidiMessage::note_on(0, 72, 50)]);

        assert!(route.stop());
        source.emit_message(MidiMessage::note_on(0, 62, 100));
        assert_eq!(dest.messages.lock().len(), 1);
    }

    #[test]
    fn test_insert_and_remove_processor() {
        let source = MidiSource::new("in");
        let dest = Arc::new(Collector::default());
        let route = MidiRoute::new(source, dest);

        let a = MidiModifier::new(Transpose::new(1));
        let b = MidiModifier::new(Transpose::new(2));
        let c = MidiModifier::new(Transpose::new(3));
        route.add_processor(a.clone());
        route.add_processor(c.clone());
        route.insert_processor(1, b.clone());
        route.insert_processor(99, MidiModifier::new(Transpose::new(4)));

        let ids: Vec<_> = route.processors().iter().map(|m| m.id()).collect();
        assert_eq!(ids[..3], [a.id(), b.id(), c.id()]);
        assert_eq!(ids.len(), 4);

        let removed = route.remove_processor(b.id()).unwrap();
        assert_eq!(removed.id(), b.id());
        assert!(route.remove_processor(b.id()).is_none());
        assert_eq!(route.processors().len(), 3);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_edit() {
        let route = MidiRoute::new(MidiSource::new("in"), Arc::new(Collector::default()));
        route.add_processor(MidiModifier::new(Transpose::new(1)));
        let snapshot = route.processors();
        route.clear_processors();
        assert_eq!(snapshot.len(), 1);
        assert!(route.processors().is_empty());
    }

    #[test]
    fn test_sysex_bypasses_chain() {
        let source = MidiSource::new("in");
        let physical = Arc::new(Collector {
            kind: Some(DestinationKind::Physical),
            ..Default::default()
        });
        let internal = Arc::new(Collector::default());

        let to_physical = MidiRoute::new(source.clone(), physical.clone());
        let to_internal = MidiRoute::new(source.clone(), internal.clone());
        // A chain that would drop everything
        to_physical.add_processor(MidiModifier::new(crate::modifier::ChannelFilter::new(0)));
        to_physical.start();
        to_internal.start();

        source.emit(SysExMessage::new(vec![0xF0, 0x7D, 0x01, 0xF7], 0).unwrap());

        assert_eq!(physical.sysex.lock().len(), 1);
        assert!(internal.sysex.lock().is_empty());
        assert_eq!(to_internal.stats().dropped, 1);
    }

    #[test]
    fn test_fault_is_terminal_and_observed() {
        let source = MidiSource::new("in");
        let dest = Arc::new(Collector {
            fail_after: Some(2),
            ..Default::default()
        });
        let route = MidiRoute::new(source.clone(), dest.clone());
        let (observer, faults) = fault_channel(4);
        route.add_observer(observer);
        route.start();

        for note in 60..65 {
            source.emit_message(MidiMessage::note_on(0, note, 100));
        }

        assert!(route.is_faulted());
        assert_eq!(dest.messages.lock().len(), 2);
        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.route, route.id());
        assert!(faults.try_recv().is_err(), "fault reported exactly once");
        assert_eq!(route.stats().delivered, 2);
        assert_eq!(route.stats().dropped, 2);

        // Rebuilt route is healthy, keeps the chain, has a new id
        let rebuilt = route.rebuild();
        assert!(!rebuilt.is_faulted());
        assert_ne!(rebuilt.id(), route.id());
        assert!(!rebuilt.is_running());
    }

    /// Fails from its own thread, the way a hardware output does.
    #[derive(Default)]
    struct Detached {
        callbacks: Mutex<Vec<crate::device::FailureCallback>>,
        messages: Mutex<Vec<MidiMessage>>,
    }

    impl Detached {
        fn unplug(&self) {
            let error = Error::Send("device unplugged".into());
            for callback in self.callbacks.lock().iter() {
                callback(&error);
            }
        }
    }

    impl MidiDestination for Detached {
        fn name(&self) -> &str {
            "detached"
        }

        fn send(&self, message: &MidiMessage) -> crate::Result<()> {
            self.messages.lock().push(*message);
            Ok(())
        }

        fn on_failure(&self, callback: crate::device::FailureCallback) {
            self.callbacks.lock().push(callback);
        }
    }

    #[test]
    fn test_asynchronous_failure_faults_without_send() {
        let source = MidiSource::new("in");
        let dest = Arc::new(Detached::default());
        let route = MidiRoute::new(source.clone(), dest.clone());
        let (observer, faults) = fault_channel(4);
        route.add_observer(observer);
        route.start();

        source.emit_message(MidiMessage::note_on(0, 60, 100));
        dest.unplug();

        assert!(route.is_faulted());
        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.route, route.id());
        assert!(fault.reason.contains("unplugged"));

        dest.unplug();
        source.emit_message(MidiMessage::note_on(0, 61, 100));
        assert!(faults.try_recv().is_err());
        assert_eq!(dest.messages.lock().len(), 1);
        assert_eq!(route.stats().dropped, 1);
    }
}
