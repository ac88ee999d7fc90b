//! Control-side registry of routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::MidiDestination;
use crate::error::{Error, Result};
use crate::route::{MidiRoute, RouteId, RouteObserver};
use crate::source::MidiSource;

/// Owns the routing graph. Only the control side touches it; delivery goes
/// straight from sources to routes without consulting the router.
#[derive(Default)]
pub struct MidiRouter {
    routes: RwLock<BTreeMap<RouteId, Arc<MidiRoute>>>,
    observers: RwLock<Vec<Arc<dyn RouteObserver>>>,
}

impl MidiRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stopped route between `source` and `destination`.
    pub fn connect(
        &self,
        source: &Arc<MidiSource>,
        destination: Arc<dyn MidiDestination>,
    ) -> Arc<MidiRoute> {
        let route = MidiRoute::new(source.clone(), destination);
        // Held across attach and insert so a concurrent `observe` sees the route
        let mut routes = self.routes.write();
        for observer in self.observers.read().iter() {
            route.add_observer(observer.clone());
        }
        routes.insert(route.id(), route.clone());
        drop(routes);
        tracing::debug!(
            "Connected route {}: '{}' -> '{}'",
            route.id(),
            source.name(),
            route.destination().name()
        );
        route
    }

    /// Stops and forgets a route.
    pub fn disconnect(&self, id: RouteId) -> Result<Arc<MidiRoute>> {
        let route = self
            .routes
            .write()
            .remove(&id)
            .ok_or(Error::RouteNotFound(id))?;
        route.stop();
        tracing::debug!("Disconnected route {}", id);
        Ok(route)
    }

    pub fn route(&self, id: RouteId) -> Option<Arc<MidiRoute>> {
        self.routes.read().get(&id).cloned()
    }

    /// All routes in creation order.
    pub fn routes(&self) -> Vec<Arc<MidiRoute>> {
        self.routes.read().values().cloned().collect()
    }

    pub fn faulted_routes(&self) -> Vec<Arc<MidiRoute>> {
        self.routes
            .read()
            .values()
            .filter(|r| r.is_faulted())
            .cloned()
            .collect()
    }

    /// Replaces a route with a fresh copy of itself and starts it.
    ///
    /// The replacement has a new id; the old one is stopped and removed.
    pub fn reconstruct(&self, id: RouteId) -> Result<Arc<MidiRoute>> {
        let mut routes = self.routes.write();
        let old = routes.remove(&id).ok_or(Error::RouteNotFound(id))?;
        old.stop();

        let fresh = old.rebuild();
        fresh.start();
        routes.insert(fresh.id(), fresh.clone());
        tracing::debug!("Reconstructed route {} as {}", id, fresh.id());
        Ok(fresh)
    }

    /// Attaches an observer to every existing and future route.
    pub fn observe(&self, observer: Arc<dyn RouteObserver>) {
        let routes = self.routes.write();
        for route in routes.values() {
            route.add_observer(observer.clone());
        }
        self.observers.write().push(observer);
    }

    /// Stops and removes every route.
    pub fn clear(&self) {
        let routes = std::mem::take(&mut *self.routes.write());
        for route in routes.values() {
            route.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl std::fmt::Debug for MidiRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiRouter")
            .field("routes", &self.len())
            .finish()
    }
}
