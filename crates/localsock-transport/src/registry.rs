use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::NativeHandle;

#[derive(Debug, Default)]
struct Sets {
    pending: HashSet<NativeHandle>,
    connected: HashSet<NativeHandle>,
}

/// Bookkeeping for pipe instances owned by a listener.
///
/// `pending` holds instances created but not yet connected; `connected`
/// holds instances handed out as connections. A handle is in at most one
/// set. Every call is atomic on its own and never blocks on native I/O, so
/// callers must remove a handle (and check the result) before closing it.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    sets: Mutex<Sets>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly created instance. Returns false if already tracked.
    pub fn add_pending(&self, handle: NativeHandle) -> bool {
        let mut sets = self.lock();
        if sets.connected.contains(&handle) {
            return false;
        }
        sets.pending.insert(handle)
    }

    /// Move `handle` from pending to connected.
    ///
    /// Returns false when the handle is no longer pending (a shutdown drained it).
    pub fn promote(&self, handle: NativeHandle) -> bool {
        let mut sets = self.lock();
        if sets.pending.remove(&handle) {
            sets.connected.insert(handle);
            true
        } else {
            false
        }
    }

    pub fn remove_pending(&self, handle: NativeHandle) -> bool {
        self.lock().pending.remove(&handle)
    }

    pub fn remove_connected(&self, handle: NativeHandle) -> bool {
        self.lock().connected.remove(&handle)
    }

    pub fn is_pending(&self, handle: NativeHandle) -> bool {
        self.lock().pending.contains(&handle)
    }

    pub fn is_connected(&self, handle: NativeHandle) -> bool {
        self.lock().connected.contains(&handle)
    }

    /// Take every pending handle out of the registry.
    pub fn drain_pending(&self) -> Vec<NativeHandle> {
        self.lock().pending.drain().collect()
    }

    /// Take every connected handle out of the registry.
    pub fn drain_connected(&self) -> Vec<NativeHandle> {
        self.lock().connected.drain().collect()
    }

    /// `(pending, connected)` counts.
    pub fn counts(&self) -> (usize, usize) {
        let sets = self.lock();
        (sets.pending.len(), sets.connected.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn h(raw: isize) -> NativeHandle {
        NativeHandle::from_raw(raw)
    }

    #[test]
    fn promote_moves_between_sets() {
        let registry = HandleRegistry::new();
        assert!(registry.add_pending(h(1)));
        assert!(registry.promote(h(1)));
        assert!(!registry.is_pending(h(1)));
        assert!(registry.is_connected(h(1)));
        assert!(!registry.promote(h(1)), "second promote must be a no-op");
        assert_eq!(registry.counts(), (0, 1));
    }

    #[test]
    fn handle_is_never_in_both_sets() {
        let registry = HandleRegistry::new();
        registry.add_pending(h(2));
        registry.promote(h(2));
        assert!(!registry.add_pending(h(2)));
        assert_eq!(registry.counts(), (0, 1));
    }

    #[test]
    fn removal_reports_membership() {
        let registry = HandleRegistry::new();
        registry.add_pending(h(3));
        assert!(!registry.remove_connected(h(3)));
        assert!(registry.remove_pending(h(3)));
        assert!(!registry.remove_pending(h(3)));
    }

    #[test]
    fn drain_empties_each_set() {
        let registry = HandleRegistry::new();
        for raw in 0..4 {
            registry.add_pending(h(raw));
        }
        registry.promote(h(0));
        registry.promote(h(1));

        let mut pending = registry.drain_pending();
        pending.sort_by_key(|handle| handle.as_raw());
        assert_eq!(pending, vec![h(2), h(3)]);
        assert_eq!(registry.drain_connected().len(), 2);
        assert_eq!(registry.counts(), (0, 0));
    }

    #[test]
    fn drained_handle_cannot_be_promoted() {
        let registry = HandleRegistry::new();
        registry.add_pending(h(5));
        assert_eq!(registry.drain_pending(), vec![h(5)]);
        assert!(!registry.promote(h(5)));
        assert_eq!(registry.counts(), (0, 0));
    }

    #[test]
    fn concurrent_independent_handles() {
        let registry = Arc::new(HandleRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let handle = h(worker * 1000 + i);
                        assert!(registry.add_pending(handle));
                        assert!(registry.promote(handle));
                        assert!(registry.remove_connected(handle));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker should finish");
        }
        assert_eq!(registry.counts(), (0, 0));
    }
}
