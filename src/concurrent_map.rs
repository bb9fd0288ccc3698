//! Thread-safe associative array kept as a sorted vector behind a mutex.
//!
//! Suited to small registries that are written once per key and read often,
//! such as a [crate::sync::Limiter] per destination shared across threads.
//! Values are handed out as [Arc]s so they stay usable after the lock is released.

use std::borrow::Borrow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Map whose entries are only ever added, never replaced or removed.
#[derive(Debug)]
pub struct ConcurrentMap<K, V> {
    entries: Mutex<Vec<(K, Arc<V>)>>,
}

impl<K: Ord, V> ConcurrentMap<K, V> {
    pub fn new() -> Self {
        ConcurrentMap {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The value stored at [key], if any.
    pub fn find<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let entries = self.entries();
        let index = search(&entries, key).ok()?;
        Some(entries[index].1.clone())
    }

    /// The value stored at [key], calling [factory] to store one first if there isn't one.
    ///
    /// [factory] runs while the map is locked, so it runs at most once per key
    /// and must not access the map itself.
    pub fn get_or_insert_with(&self, key: K, factory: impl FnOnce() -> V) -> Arc<V> {
        let mut entries = self.entries();

        match search(&entries, &key) {
            Ok(index) => entries[index].1.clone(),
            Err(index) => {
                let value = Arc::new(factory());
                entries.insert(index, (key, value.clone()));
                value
            }
        }
    }

    /// The value stored at [key], storing [value] first if there isn't one.
    ///
    /// [value] is dropped if the key is already present.
    pub fn get_or_insert(&self, key: K, value: V) -> Arc<V> {
        self.get_or_insert_with(key, || value)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    // a panicking factory never leaves a half-inserted entry behind
    fn entries(&self) -> MutexGuard<'_, Vec<(K, Arc<V>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Ord, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        ConcurrentMap::new()
    }
}

fn search<K, V, Q>(entries: &[(K, Arc<V>)], key: &Q) -> Result<usize, usize>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    entries.binary_search_by(|(probe, _)| probe.borrow().cmp(key))
}
