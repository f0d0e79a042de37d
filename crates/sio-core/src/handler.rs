use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque registration handle, used to remove a single handler again.
///
/// Ids are only meaningful against the store that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A set of registered handlers of one shape.
///
/// Every lifecycle surface (connect, disconnect, manager events, errors)
/// keeps one of these per event. Handlers run outside the store's lock:
/// callers take a [`snapshot`](HandlerStore::snapshot) and invoke it
/// afterwards, which also consumes `once` registrations.
pub struct HandlerStore<H: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<H>>>,
}

struct Entry<H: ?Sized> {
    id: HandlerId,
    once: bool,
    handler: Arc<H>,
}

impl<H: ?Sized> HandlerStore<H> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, handler: Arc<H>) -> HandlerId {
        self.insert(handler, false)
    }

    pub fn once(&self, handler: Arc<H>) -> HandlerId {
        self.insert(handler, true)
    }

    fn insert(&self, handler: Arc<H>, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry { id, once, handler });
        id
    }

    pub fn off(&self, id: HandlerId) {
        self.entries.lock().retain(|entry| entry.id != id);
    }

    pub fn off_all(&self) {
        self.entries.lock().clear();
    }

    /// Current handlers in registration order. `once` entries are removed
    /// from the store as part of the snapshot.
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        let mut entries = self.entries.lock();
        let out: Vec<Arc<H>> = entries.iter().map(|e| Arc::clone(&e.handler)).collect();
        entries.retain(|e| !e.once);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl<H: ?Sized> Default for HandlerStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Counter = dyn Fn() + Send + Sync;

    fn counting(hits: &Arc<AtomicUsize>) -> Arc<Counter> {
        let hits = Arc::clone(hits);
        Arc::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let store: HandlerStore<Counter> = HandlerStore::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            store.on(Arc::new(move || order.lock().push(n)));
        }
        for handler in store.snapshot() {
            handler();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn once_handlers_fire_a_single_time() {
        let store: HandlerStore<Counter> = HandlerStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        store.once(counting(&hits));
        store.on(counting(&hits));

        for handler in store.snapshot() {
            handler();
        }
        for handler in store.snapshot() {
            handler();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn off_removes_exactly_one_registration() {
        let store: HandlerStore<Counter> = HandlerStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = store.on(counting(&hits));
        store.on(counting(&hits));
        store.off(id);

        for handler in store.snapshot() {
            handler();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        store.off_all();
        assert!(store.is_empty());
    }
}
