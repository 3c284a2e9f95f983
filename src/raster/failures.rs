use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Recently failed keys and their errors, remembered for `ttl`.
///
/// Lookups peek, so LRU order is insertion order and the oldest entry is
/// always the next to expire. Inserting drops expired entries from that end
/// and the least recent ones beyond `capacity`.
pub struct FailureMemo<E> {
    entries: Mutex<LruCache<String, (Instant, E)>>,
    ttl: Duration,
}

impl<E: Clone> FailureMemo<E> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// The remembered error for `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<E> {
        let mut entries = lock(&self.entries);
        match entries.peek(key) {
            Some((at, err)) if at.elapsed() < self.ttl => Some(err.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, err: E) {
        let mut entries = lock(&self.entries);
        while matches!(entries.peek_lru(), Some((_, (at, _))) if at.elapsed() >= self.ttl) {
            entries.pop_lru();
        }
        entries.put(key.into(), (Instant::now(), err));
    }

    pub fn remove(&self, key: &str) {
        lock(&self.entries).pop(key);
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
