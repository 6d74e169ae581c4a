//! In-process cache tier backed by a concurrent map.
//!
//! Slots expire lazily: a read past the deadline deletes the slot and
//! reports a miss, and the engine's housekeeping ticker purges the rest.
//! When the tier is full, inserting a new key evicts the slot closest to
//! its deadline.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// One cached value and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheSlot<V> {
    pub value: V,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheSlot<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            stored_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-process tier.
pub struct MemoryTier<V> {
    slots: DashMap<String, CacheSlot<V>>,
    max_entries: usize,
}

impl<V: Clone> MemoryTier<V> {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Get a live value. Expired slots are deleted on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => return Some(slot.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.slots.remove(key);
            crate::metrics::record_l1_evictions("expired", 1);
        }
        None
    }

    /// Insert or refresh a slot. Refreshing replaces both value and TTL.
    pub fn insert(&self, key: &str, value: V, ttl: Duration) {
        if self.slots.len() >= self.max_entries && !self.slots.contains_key(key) {
            self.evict_soonest_expiring();
        }
        self.slots.insert(key.to_string(), CacheSlot::new(value, ttl));
    }

    /// Remove a slot, reporting whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Drop everything, returning how many slots went.
    pub fn clear(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    /// Delete every slot past its deadline.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            crate::metrics::record_l1_evictions("expired", purged);
        }
        purged
    }

    /// Time left before `key` expires, if it is present and live.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.expires_at - now)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Evict the slot closest to its deadline.
    ///
    /// Linear scan, but it only runs on overflow of a full tier. Racing
    /// inserts can overshoot the bound by a few slots; the next overflow
    /// corrects it.
    fn evict_soonest_expiring(&self) {
        let victim = self
            .slots
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.slots.remove(&key);
            crate::metrics::record_l1_evictions("capacity", 1);
            debug!(key = %key, "evicted soonest-expiring slot at capacity");
        }
    }
}
