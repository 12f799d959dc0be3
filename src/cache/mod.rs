//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy invoke (cache enabled):
//!     → RequestKey derived from (prompt, options)
//!     → ResponseCache::get (hit: return, no backend call)
//!     → backend call on miss
//!     → ResponseCache::put on success only
//! ```
//!
//! # Design Decisions
//! - Strict LRU eviction plus a per-entry TTL
//! - Expired entries are dropped lazily on access, no background sweep
//! - The data structure itself is single-owner (`&mut self`); sharing goes
//!   through `SharedLruCache`, which holds its lock only for the synchronous
//!   lookup or update

pub mod lru;

use std::sync::Mutex;
use std::time::Duration;

pub use lru::ExpiringLruCache;

/// Cache seam injected into the proxy.
///
/// Implementations must never block on I/O or yield: every call is expected to
/// complete its mutation before returning.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: String, value: String);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe wrapper around an [`ExpiringLruCache`] of rendered responses.
pub struct SharedLruCache {
    inner: Mutex<ExpiringLruCache<String, String>>,
}

impl SharedLruCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ExpiringLruCache::new(capacity, ttl)),
        }
    }

    /// Drop every entry whose TTL has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .purge_expired()
    }
}

impl ResponseCache for SharedLruCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.inner.lock().expect("response cache mutex poisoned");
        cache.get(key).cloned()
    }

    fn put(&self, key: String, value: String) {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .put(key, value);
    }

    fn clear(&self) {
        self.inner.lock().expect("response cache mutex poisoned").clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("response cache mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_cache_round_trip() {
        let cache = SharedLruCache::new(4, Duration::from_secs(60));
        assert!(cache.is_empty());

        cache.put("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
