use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// At most one outstanding operation per key.
///
/// A second `try_acquire` for a key that is already held returns `None`; it
/// is never queued or coalesced. The key is released when the returned guard
/// drops, including on early return or task abort.
pub struct SingleFlight<K: Eq + Hash> {
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn try_acquire(&self, key: K) -> Option<FlightGuard<K>> {
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(FlightGuard {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.held.lock().contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Clone for SingleFlight<K> {
    fn clone(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

#[must_use = "the key is released as soon as the guard is dropped"]
pub struct FlightGuard<K: Eq + Hash> {
    key: K,
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> FlightGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}
