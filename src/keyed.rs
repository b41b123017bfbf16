//! Lazily-populated map of independently locked per-key state.
//!
//! The circuit breaker, page sizer and pagination predictor all keep one
//! small record per symbol/market key. The outer map lock is only held
//! long enough to find or insert an entry; mutations then lock just that
//! entry so unrelated keys never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of `T` values keyed by string, each behind its own mutex.
#[derive(Debug, Default)]
pub struct KeyedState<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedState<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the entry for `key`, creating a default one on first access.
    pub fn entry(&self, key: &str) -> Arc<Mutex<T>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(Mutex::new(T::default()));
        entries.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    /// Runs `f` with exclusive access to the entry for `key`.
    pub fn with<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let entry = self.entry(key);
        let mut guard = entry.lock();
        f(&mut guard)
    }

    /// Number of keys seen so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
