//! In-process exclusive locks keyed by entity id.
//!
//! Mutations of one order (and its jobs) are serialized on the order's key;
//! printer assignment is serialized on the printer's key. Multi-key
//! acquisitions are taken in sorted order, and `LockKey` sorts every order
//! before every printer, so nesting a printer lock inside an order lock is
//! always consistent with a sorted acquisition.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use printforge_core::{OrderId, PrinterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Order(OrderId),
    Printer(PrinterId),
}

#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Clone + Eq + Hash + Ord,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        self.with_locks([key], f)
    }

    /// Run `f` while holding every lock in `keys` (deduplicated, taken in order).
    pub fn with_locks<R>(&self, keys: impl IntoIterator<Item = K>, f: impl FnOnce() -> R) -> R {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let slots: Vec<Arc<Mutex<()>>> = keys.iter().map(|k| self.slot(k)).collect();
        // A panic while holding a slot does not leave shared state behind, so
        // poisoned slots are reused.
        let guards: Vec<MutexGuard<'_, ()>> = slots
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let out = f();
        drop(guards);
        self.release(&keys, slots);
        out
    }

    /// Drop our handles and evict slots nobody else is holding or waiting on.
    /// Handles are only cloned under the table lock, so the count is stable here.
    fn release(&self, keys: &[K], held: Vec<Arc<Mutex<()>>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        drop(held);
        for key in keys {
            if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    locks.with_lock(7, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn released_slots_are_evicted() {
        let locks = KeyedLocks::<u32>::new();
        locks.with_lock(1, || assert_eq!(locks.len(), 1));
        assert_eq!(locks.len(), 0);

        locks.with_locks([5, 2, 9], || assert_eq!(locks.len(), 3));
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn duplicate_keys_do_not_deadlock() {
        let locks = KeyedLocks::<u32>::new();
        let out = locks.with_locks([3, 1, 3, 1], || 42);
        assert_eq!(out, 42);
    }

    #[test]
    fn orders_sort_before_printers() {
        let order = LockKey::Order(OrderId::new());
        let printer = LockKey::Printer(PrinterId::new());
        assert!(order < printer);
    }
}
