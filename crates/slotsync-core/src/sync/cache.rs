//! Versioned cache with staleness marking
//!
//! One [`CacheEntry`] per key. Every accepted push bumps `version`, replaces
//! `data`, stamps `last_updated` and clears `is_stale`. The staleness sweep
//! only flags entries; it never drops data.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::EngineResult;

/// Cached value plus its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub last_updated: DateTime<Utc>,
    /// Starts at 1 on the first accepted push
    pub version: u64,
    pub is_stale: bool,
}

/// Generic keyed cache
///
/// Writers are serialized per cache by the inner lock; readers get cloned
/// snapshots and never observe a half-applied update.
#[derive(Debug)]
pub struct Cache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value for `key`. Returns the new version.
    pub fn apply(&self, key: K, data: V, now: DateTime<Utc>) -> u64 {
        let mut entries = self.entries.write();
        let version = entries.get(&key).map_or(0, |e| e.version) + 1;
        entries.insert(
            key,
            CacheEntry {
                data,
                last_updated: now,
                version,
                is_stale: false,
            },
        );
        version
    }

    /// Derive the next value from the current one and commit it.
    ///
    /// If `f` fails the entry is left exactly as it was.
    pub fn update<F>(&self, key: &K, now: DateTime<Utc>, f: F) -> EngineResult<CacheEntry<V>>
    where
        F: FnOnce(Option<&V>) -> EngineResult<V>,
    {
        let mut entries = self.entries.write();
        let current = entries.get(key);
        let data = f(current.map(|e| &e.data))?;
        let entry = CacheEntry {
            data,
            last_updated: now,
            version: current.map_or(0, |e| e.version) + 1,
            is_stale: false,
        };
        entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Flag an entry stale. Returns `true` if the flag changed.
    pub fn mark_stale(&self, key: &K) -> bool {
        match self.entries.write().get_mut(key) {
            Some(entry) if !entry.is_stale => {
                entry.is_stale = true;
                true
            }
            _ => false,
        }
    }

    /// Flag every entry not updated within `threshold` of `now`.
    ///
    /// Returns the keys that became stale in this sweep.
    pub fn sweep_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<K> {
        let mut flagged = Vec::new();
        for (key, entry) in self.entries.write().iter_mut() {
            if !entry.is_stale && now - entry.last_updated > threshold {
                entry.is_stale = true;
                flagged.push(key.clone());
            }
        }
        flagged
    }

    pub fn remove(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.write().remove(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn stale_keys(&self) -> Vec<K> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_stale)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
