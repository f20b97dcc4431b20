// Observer registry — multicast of availability/connection events
//
// Registrations are weak: the registry never owns an observer's lifetime.
// Dead entries are pruned on every broadcast, and an explicit unregister is
// available for hosts that prefer deterministic removal.

use crate::types::Peripheral;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Callbacks delivered on the control task. Implementations must not block.
pub trait LinkObserver: Send + Sync {
    fn availability_changed(&self, _available: bool) {}
    fn peripheral_connected(&self, _peripheral: &Peripheral) {}
    fn peripheral_disconnected(&self, _peripheral: &Peripheral) {}
}

pub(crate) struct ObserverRegistry {
    observers: Vec<Weak<dyn LinkObserver>>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    fn data_ptr(observer: &Arc<dyn LinkObserver>) -> *const () {
        Arc::as_ptr(observer) as *const ()
    }

    fn prune(&mut self) {
        self.observers.retain(|w| w.strong_count() > 0);
    }

    /// Register an observer and immediately replay the current availability
    /// and, if connected, the current peripheral, so a late registrant is
    /// never out of sync. Re-registering the same observer replaces the old
    /// entry.
    pub(crate) fn register(
        &mut self,
        observer: &Arc<dyn LinkObserver>,
        available: bool,
        connected: Option<&Peripheral>,
    ) {
        self.prune();
        let ptr = Self::data_ptr(observer);
        self.observers
            .retain(|w| w.as_ptr() as *const () != ptr);
        self.observers.push(Arc::downgrade(observer));
        debug!("observer registered ({} active)", self.observers.len());

        observer.availability_changed(available);
        if let Some(peripheral) = connected {
            observer.peripheral_connected(peripheral);
        }
    }

    /// Remove all entries matching the observer's identity.
    pub(crate) fn unregister(&mut self, observer: &Arc<dyn LinkObserver>) {
        let ptr = Self::data_ptr(observer);
        self.observers
            .retain(|w| w.strong_count() > 0 && w.as_ptr() as *const () != ptr);
        debug!("observer unregistered ({} active)", self.observers.len());
    }

    pub(crate) fn notify_availability(&mut self, available: bool) {
        self.prune();
        for observer in self.observers.iter().filter_map(Weak::upgrade) {
            observer.availability_changed(available);
        }
    }

    pub(crate) fn notify_connected(&mut self, peripheral: &Peripheral) {
        self.prune();
        for observer in self.observers.iter().filter_map(Weak::upgrade) {
            observer.peripheral_connected(peripheral);
        }
    }

    pub(crate) fn notify_disconnected(&mut self, peripheral: &Peripheral) {
        self.prune();
        for observer in self.observers.iter().filter_map(Weak::upgrade) {
            observer.peripheral_disconnected(peripheral);
        }
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
