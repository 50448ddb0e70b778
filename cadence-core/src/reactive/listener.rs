//! Commit listeners.
//!
//! A listener is a callback the engine invokes after every committed pass,
//! with the pass report carrying the new root value.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::PassReport;

/// Unique identifier for a registered listener.
///
/// Uses an atomic counter, so ids stay unique across engines and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A commit callback with its id.
pub struct Listener {
    id: ListenerId,
    notify: Box<dyn FnMut(&PassReport) + Send>,
}

impl Listener {
    /// Wrap `notify` under a fresh id.
    pub fn new<F>(notify: F) -> Self
    where
        F: FnMut(&PassReport) + Send + 'static,
    {
        Self {
            id: ListenerId::new(),
            notify: Box::new(notify),
        }
    }

    /// Get the listener's ID.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Invoke the callback with `report`.
    pub fn notify(&mut self, report: &PassReport) {
        (self.notify)(report);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

/// Registered listeners in registration order.
#[derive(Debug, Default)]
pub struct Listeners {
    listeners: Vec<Listener>,
}

impl Listeners {
    /// Register `listener` after the existing ones and return its id.
    pub fn add(&mut self, listener: Listener) -> ListenerId {
        let id = listener.id();
        self.listeners.push(listener);
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id() != id);
        self.listeners.len() != before
    }

    /// Invoke every listener in registration order.
    pub fn notify(&mut self, report: &PassReport) {
        for listener in &mut self.listeners {
            listener.notify(report);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn listener_ids_are_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn removed_listeners_are_not_notified() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();
        let counter = Arc::clone(&calls);
        let id = listeners.add(Listener::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let report = PassReport::default();
        listeners.notify(&report);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.notify(&report);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }
}
