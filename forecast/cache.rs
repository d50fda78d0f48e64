//! At-most-once memoization.
//!
//! Each key owns a cell guarded by its own mutex. The first requester computes the
//! value while holding the cell's lock; concurrent requesters for the same key block
//! on that lock and then read the stored value. Requesters for other keys are never
//! blocked.
//! A failed computation leaves the cell empty so a later request may retry.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

type Cell<V> = Arc<Mutex<Option<V>>>;

pub struct Memo<K, V> {
    cells: DashMap<K, Cell<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for Memo<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Memo<K, V> {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let cell = self.cells.get(key).map(|entry| entry.value().clone())?;
        let guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Returns the stored value for `key`, computing it with `compute` if no value
    /// has been stored yet.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let cell: Cell<V> = self.cells.entry(key).or_default().value().clone();
        let mut guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        let value = compute()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    /// Forgets the value stored for `key`.
    pub fn invalidate(&self, key: &K) {
        self.cells.remove(key);
    }

    /// Forgets every stored value whose key fails `keep`.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.cells.retain(|key, _| keep(key));
    }

    /// Number of keys holding a computed value.
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .map(|guard| guard.is_some())
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
