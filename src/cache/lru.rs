//! Bounded LRU cache with per-entry time-to-live.
//!
//! Entries live in a slot arena threaded by a doubly-linked recency list:
//! head is the least recently used key, tail the most recently used. The key
//! map and the list always hold the same set of keys.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Slot<K, V> {
    key: K,
    value: V,
    stored_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used cache whose entries expire `ttl` after they were stored.
pub struct ExpiringLruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> ExpiringLruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity or zero TTL yields a pass-through cache that never
    /// returns a value.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            map: HashMap::with_capacity(capacity.min(1024)),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of occupied slots, including expired entries not yet dropped.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up a live entry and mark it most recently used.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        let stored_at = self.slots[idx].as_ref()?.stored_at;

        if !self.is_fresh(stored_at, Instant::now()) {
            self.remove_slot(idx);
            return None;
        }

        self.move_to_tail(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Insert or replace a value, refreshing its timestamp and recency.
    ///
    /// Inserting a new key into a full cache evicts the least recently used
    /// entry first.
    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        if let Some(&idx) = self.map.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
                slot.stored_at = now;
            }
            self.move_to_tail(idx);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_head();
        }

        let idx = self.allocate();
        self.slots[idx] = Some(Slot {
            key: key.clone(),
            value,
            stored_at: now,
            prev: self.tail,
            next: None,
        });
        self.link_after_tail(idx);
        self.map.insert(key, idx);
    }

    /// Remove an entry regardless of its age.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.remove_slot(idx).map(|slot| slot.value)
    }

    /// Drop every entry whose TTL has elapsed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .map
            .values()
            .copied()
            .filter(|&idx| {
                self.slots[idx]
                    .as_ref()
                    .is_some_and(|slot| !self.is_fresh(slot.stored_at, now))
            })
            .collect();

        for &idx in &expired {
            self.remove_slot(idx);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(stored_at) <= self.ttl
    }

    fn allocate(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            idx
        } else {
            self.slots.push(None);
            self.slots.len() - 1
        }
    }

    fn evict_head(&mut self) {
        if let Some(idx) = self.head {
            self.remove_slot(idx);
        }
    }

    /// Unlink a slot from both the recency list and the key map.
    fn remove_slot(&mut self, idx: usize) -> Option<Slot<K, V>> {
        self.unlink(idx);
        let slot = self.slots[idx].take()?;
        self.map.remove(&slot.key);
        self.free.push(idx);
        Some(slot)
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = self.tail;
            slot.next = None;
        }
        self.link_after_tail(idx);
    }

    fn link_after_tail(&mut self, idx: usize) {
        match self.tail {
            Some(old_tail) => {
                if let Some(slot) = self.slots[old_tail].as_mut() {
                    slot.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.slots[idx].as_ref().map(|s| (s.prev, s.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    /// Keys from least to most recently used.
    #[cfg(test)]
    fn recency_order(&self) -> Vec<K> {
        let mut keys = Vec::new();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let slot = self.slots[idx].as_ref().expect("linked slot must be occupied");
            assert_eq!(self.map.get(&slot.key), Some(&idx));
            keys.push(slot.key.clone());
            cursor = slot.next;
        }
        assert_eq!(keys.len(), self.map.len(), "recency list and key map diverged");
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_get_missing_key_is_absent() {
        let mut cache: ExpiringLruCache<&str, i32> = ExpiringLruCache::new(2, HOUR);
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn test_recently_read_key_survives_eviction() {
        let mut cache = ExpiringLruCache::new(2, HOUR);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(&1));

        cache.put("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_put_existing_key_refreshes_recency() {
        let mut cache = ExpiringLruCache::new(2, HOUR);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);

        assert_eq!(cache.get("a"), Some(&10));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.recency_order(), vec!["c", "a"]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache = ExpiringLruCache::new(3, HOUR);
        for i in 0..50 {
            cache.put(i, i * 2);
            if i % 4 == 0 {
                cache.get(&(i / 2));
            }
            assert!(cache.len() <= 3);
            cache.recency_order();
        }
        assert_eq!(cache.recency_order(), vec![47, 48, 49]);
    }

    #[test]
    fn test_zero_capacity_is_pass_through() {
        let mut cache = ExpiringLruCache::new(0, HOUR);
        cache.put("a", 1);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let mut cache = ExpiringLruCache::new(4, Duration::ZERO);
        cache.put("a", 1);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = ExpiringLruCache::new(3, HOUR);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);

        assert_eq!(cache.remove("b"), Some(2));
        assert_eq!(cache.remove("b"), None);
        assert_eq!(cache.recency_order(), vec!["a", "c"]);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let ttl = Duration::from_secs(10);
        let epsilon = Duration::from_millis(1);
        let mut cache = ExpiringLruCache::new(4, ttl);

        cache.put("a", 1);
        advance(ttl - epsilon).await;
        assert_eq!(cache.get("a"), Some(&1));

        advance(epsilon * 2).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0, "expired hit is dropped on access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_timestamp() {
        let ttl = Duration::from_secs(10);
        let mut cache = ExpiringLruCache::new(4, ttl);

        cache.put("a", 1);
        advance(Duration::from_secs(8)).await;
        cache.put("a", 2);
        advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("a"), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let mut cache = ExpiringLruCache::new(4, Duration::from_secs(10));
        cache.put("old", 1);
        advance(Duration::from_secs(6)).await;
        cache.put("new", 2);
        advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.recency_order(), vec!["new"]);
    }
}
