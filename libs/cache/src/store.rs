//! # KeyValueCacheStore
//!
//! Shared-read / exclusive-write mapping store. Point reads take the shared
//! lock; every write takes the exclusive lock and is therefore totally ordered
//! with respect to other operations on the same instance.
//!
//! Whole-map writes (`replace_all`, `swap_epoch`, `clear`) swap the inner
//! `Arc<HashMap>` and bump the generation. Point writes (`set`, `set_many`,
//! `set_many_if`) copy-on-write the map when a snapshot is still held
//! elsewhere, so an outstanding [`StoreSnapshot`] never changes underneath
//! its reader.

use crate::invalidate::CacheInvalidation;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;
use types::{CacheGeneration, Epoch};

struct StoreInner<K, V> {
    entries: Arc<HashMap<K, V>>,
    generation: CacheGeneration,
    /// Epoch the current contents were loaded for
    epoch: Option<Epoch>,
}

/// Thread-safe mapping store with generation tracking
pub struct KeyValueCacheStore<K, V> {
    name: String,
    inner: RwLock<StoreInner<K, V>>,
}

/// Consistent view of a store taken under a single shared lock
#[derive(Debug, Clone)]
pub struct StoreSnapshot<K, V> {
    pub generation: CacheGeneration,
    pub epoch: Option<Epoch>,
    pub entries: Arc<HashMap<K, V>>,
}

impl<K, V> StoreSnapshot<K, V>
where
    K: Eq + Hash,
{
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> KeyValueCacheStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(StoreInner {
                entries: Arc::new(HashMap::new()),
                generation: CacheGeneration::INITIAL,
                epoch: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point read
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Replace the value for one key
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        Arc::make_mut(&mut inner.entries).insert(key, value);
    }

    /// Replace the values for several keys under one exclusive lock
    pub fn set_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut inner = self.inner.write();
        let map = Arc::make_mut(&mut inner.entries);
        let mut written = 0;
        for (key, value) in entries {
            map.insert(key, value);
            written += 1;
        }
        written
    }

    /// `set_many`, but only if no whole-map write happened since `expected`
    /// was read. Returns the number written, or `None` if the store moved on.
    pub fn set_many_if<I>(&self, expected: CacheGeneration, entries: I) -> Option<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut inner = self.inner.write();
        if inner.generation != expected {
            debug!(
                store = %self.name,
                expected = %expected,
                generation = %inner.generation,
                "Discarding fill for an older generation"
            );
            return None;
        }
        let map = Arc::make_mut(&mut inner.entries);
        let mut written = 0;
        for (key, value) in entries {
            map.insert(key, value);
            written += 1;
        }
        Some(written)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut inner.entries).remove(key)
    }

    /// Swap the whole map as one unit
    pub fn replace_all(&self, entries: HashMap<K, V>) -> CacheGeneration {
        let mut inner = self.inner.write();
        inner.entries = Arc::new(entries);
        inner.generation = inner.generation.next();
        debug!(
            store = %self.name,
            generation = %inner.generation,
            entries = inner.entries.len(),
            "Replaced store contents"
        );
        inner.generation
    }

    /// Swap the whole map and tag it with the epoch it was loaded for
    pub fn swap_epoch(&self, epoch: Epoch, entries: HashMap<K, V>) -> CacheGeneration {
        let mut inner = self.inner.write();
        inner.entries = Arc::new(entries);
        inner.generation = inner.generation.next();
        inner.epoch = Some(epoch);
        debug!(
            store = %self.name,
            generation = %inner.generation,
            epoch = ?inner.epoch,
            entries = inner.entries.len(),
            "Swapped store contents"
        );
        inner.generation
    }

    /// Swap only if `still_valid` holds while the exclusive lock is held.
    ///
    /// `still_valid` must not take any other store or coordinator lock; the
    /// transition driver passes an atomic transition-id comparison.
    pub fn replace_all_if<F>(
        &self,
        epoch: Epoch,
        entries: HashMap<K, V>,
        still_valid: F,
    ) -> Option<CacheGeneration>
    where
        F: FnOnce() -> bool,
    {
        let mut inner = self.inner.write();
        if !still_valid() {
            debug!(store = %self.name, epoch = %epoch, "Discarding stale load");
            return None;
        }
        inner.entries = Arc::new(entries);
        inner.generation = inner.generation.next();
        inner.epoch = Some(epoch);
        Some(inner.generation)
    }

    /// Atomic replace-with-empty; drops the epoch tag
    pub fn clear(&self) -> CacheGeneration {
        let mut inner = self.inner.write();
        inner.entries = Arc::new(HashMap::new());
        inner.generation = inner.generation.next();
        inner.epoch = None;
        inner.generation
    }

    pub fn snapshot(&self) -> StoreSnapshot<K, V> {
        let inner = self.inner.read();
        StoreSnapshot {
            generation: inner.generation,
            epoch: inner.epoch.clone(),
            entries: Arc::clone(&inner.entries),
        }
    }

    pub fn generation(&self) -> CacheGeneration {
        self.inner.read().generation
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.inner.read().epoch.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl<K, V> CacheInvalidation for KeyValueCacheStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn invalidate(&self) {
        self.clear();
    }

    fn cache_name(&self) -> &str {
        &self.name
    }
}

impl<K, V> std::fmt::Debug for KeyValueCacheStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("KeyValueCacheStore")
            .field("name", &self.name)
            .field("generation", &inner.generation)
            .field("epoch", &inner.epoch)
            .field("entries", &inner.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn store() -> KeyValueCacheStore<String, String> {
        KeyValueCacheStore::new("test")
    }

    #[test]
    fn test_get_set_remove() {
        let store = store();
        assert_eq!(store.get(&"band".to_string()), None);

        store.set("band".to_string(), "Amorphis".to_string());
        assert_eq!(store.get(&"band".to_string()), Some("Amorphis".to_string()));
        assert_eq!(store.len(), 1);

        assert_eq!(
            store.remove(&"band".to_string()),
            Some("Amorphis".to_string())
        );
        assert!(store.is_empty());
        assert_eq!(store.remove(&"band".to_string()), None);
    }

    #[test]
    fn test_whole_map_writes_bump_generation() {
        let store = store();
        let start = store.generation();

        store.set("a".to_string(), "1".to_string());
        assert_eq!(store.generation(), start);

        let after_replace = store.replace_all(HashMap::from([("b".to_string(), "2".to_string())]));
        assert_eq!(after_replace, start.next());
        assert_eq!(store.get(&"a".to_string()), None);

        let after_swap = store.swap_epoch(Epoch::from_year(2025), HashMap::new());
        assert_eq!(after_swap, after_replace.next());
        assert_eq!(store.epoch(), Some(Epoch::from_year(2025)));

        let after_clear = store.clear();
        assert_eq!(after_clear, after_swap.next());
        assert_eq!(store.epoch(), None);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let store = store();
        store.swap_epoch(
            Epoch::from_year(2024),
            HashMap::from([("a".to_string(), "old".to_string())]),
        );
        let snapshot = store.snapshot();

        store.set("a".to_string(), "new".to_string());
        store.set("b".to_string(), "added".to_string());

        assert_eq!(snapshot.get(&"a".to_string()), Some(&"old".to_string()));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.epoch, Some(Epoch::from_year(2024)));
        assert_eq!(store.get(&"a".to_string()), Some("new".to_string()));
    }

    #[test]
    fn test_replace_all_if_discards_when_predicate_fails() {
        let store = store();
        store.set("keep".to_string(), "me".to_string());
        let before = store.generation();

        let result = store.replace_all_if(Epoch::from_year(2026), HashMap::new(), || false);
        assert_eq!(result, None);
        assert_eq!(store.generation(), before);
        assert!(store.contains_key(&"keep".to_string()));

        let result = store.replace_all_if(Epoch::from_year(2026), HashMap::new(), || true);
        assert_eq!(result, Some(before.next()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_many_if_rejects_fill_from_older_generation() {
        let store = store();
        let seen = store.generation();

        store.clear();
        let rows = vec![("artistUrl".to_string(), "http://old".to_string())];
        assert_eq!(store.set_many_if(seen, rows), None);
        assert!(store.is_empty());

        let current = store.generation();
        let rows = vec![("artistUrl".to_string(), "http://new".to_string())];
        assert_eq!(store.set_many_if(current, rows), Some(1));
        assert_eq!(store.get(&"artistUrl".to_string()), Some("http://new".to_string()));
        // Point writes leave the generation alone
        let rows = vec![("scheduleUrl".to_string(), "http://s".to_string())];
        assert_eq!(store.set_many(rows), 1);
        assert_eq!(store.generation(), current);
    }

    #[test]
    fn test_invalidation_trait_clears() {
        let store = store();
        store.set("a".to_string(), "1".to_string());
        let target: &dyn CacheInvalidation = &store;
        target.invalidate();
        assert!(store.is_empty());
        assert_eq!(target.cache_name(), "test");
    }

    #[test]
    fn test_readers_never_see_half_updated_map() {
        let store = Arc::new(KeyValueCacheStore::<u32, u32>::new("concurrent"));
        store.replace_all((0..64).map(|k| (k, 0)).collect());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 1..200u32 {
                    store.replace_all((0..64).map(|k| (k, round)).collect());
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        let first = snapshot.get(&0).copied();
                        assert!(snapshot.entries.values().all(|v| Some(*v) == first));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_replace_all_exposes_exactly_new_map(
            old in proptest::collection::hash_map(0u16..512, 0u32..100, 0..32),
            new in proptest::collection::hash_map(0u16..512, 0u32..100, 0..32),
        ) {
            let store = KeyValueCacheStore::new("prop");
            store.replace_all(old);
            store.replace_all(new.clone());
            prop_assert_eq!(store.len(), new.len());
            for (key, value) in &new {
                prop_assert_eq!(store.get(key), Some(*value));
            }
        }
    }
}
