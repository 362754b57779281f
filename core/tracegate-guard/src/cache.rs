//! Process-local deny cache.
//!
//! Entries record a denial (a ban, a consumed nonce, a rate-limit
//! cooldown) until an instant. A hit lets the caller reject without a
//! store round trip; a miss proves nothing and must fall through to the
//! store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;

/// Chance that an insert triggers a sweep of expired entries.
const SWEEP_PROBABILITY: f64 = 0.01;

/// Default size above which every insert sweeps.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// A map of denials keyed by identifier, each live until an instant.
pub struct DenyCache<V> {
    entries: RwLock<HashMap<String, (V, DateTime<Utc>)>>,
    capacity: usize,
}

impl<V: Clone> DenyCache<V> {
    /// Creates a cache that sweeps on every insert once it holds more than
    /// `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the cached value if its denial is still in force.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .read()
            .get(key)
            .filter(|(_, until)| now < *until)
            .map(|(v, _)| v.clone())
    }

    /// Records a denial for `key` until `until`.
    pub fn insert(&self, key: impl Into<String>, value: V, until: DateTime<Utc>, now: DateTime<Utc>) {
        if until <= now {
            return;
        }
        let mut entries = self.entries.write();
        entries.insert(key.into(), (value, until));
        if entries.len() > self.capacity || rand::thread_rng().gen_bool(SWEEP_PROBABILITY) {
            entries.retain(|_, (_, until)| now < *until);
        }
    }

    /// Forgets `key`.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, until)| now < *until);
        before - entries.len()
    }

    /// Number of entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for DenyCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn entries_expire() {
        let cache = DenyCache::new(10);
        let now = Utc::now();
        cache.insert("a", 1, now + Duration::seconds(5), now);
        assert_eq!(cache.get("a", now), Some(1));
        assert_eq!(cache.get("a", now + Duration::seconds(5)), None);
    }

    #[test]
    fn already_expired_insert_is_ignored() {
        let cache = DenyCache::new(10);
        let now = Utc::now();
        cache.insert("a", (), now, now);
        assert!(cache.is_empty());
    }

    #[test]
    fn over_capacity_insert_sweeps() {
        let cache = DenyCache::new(2);
        let now = Utc::now();
        cache.insert("a", (), now + Duration::seconds(1), now);
        cache.insert("b", (), now + Duration::seconds(1), now);
        let later = now + Duration::seconds(2);
        cache.insert("c", (), later + Duration::seconds(1), later);
        assert_eq!(cache.len(), 1);
    }
}
