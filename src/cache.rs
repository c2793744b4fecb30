//! A small TTL-bounded cache.
//!
//! Used by the poller to memoize license-to-EA resolutions. The cache is an
//! explicit object passed to whoever needs it; there is no process-wide
//! state. The `*_at` variants take the current time as a parameter so tests
//! can drive a fake clock.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// An entry together with its insertion time.
#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A bounded map whose entries expire after a fixed TTL.
///
/// Entries are immutable within their TTL window; a lookup after expiry
/// misses, and the caller re-fetches and replaces the entry wholesale.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache with the given TTL and maximum entry count.
    pub fn new(ttl: std::time::Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            capacity: capacity.max(1),
        }
    }

    /// Look up a live entry.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Look up a live entry, judging expiry against an explicit `now`.
    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| now - entry.inserted_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace an entry, stamped with the current time.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    /// Insert or replace an entry, stamped with an explicit `now`.
    ///
    /// When the cache is full, expired entries are evicted first; if it is
    /// still full, the oldest entry is dropped.
    pub fn insert_at(&mut self, key: K, value: V, now: DateTime<Utc>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_expired_at(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, Entry {
            value,
            inserted_at: now,
        });
    }

    /// Remove all expired entries.
    pub fn evict_expired(&mut self) {
        self.evict_expired_at(Utc::now());
    }

    /// Remove all entries expired as of an explicit `now`.
    pub fn evict_expired_at(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.inserted_at < ttl);
    }

    /// Number of entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&key);
        }
    }
}
