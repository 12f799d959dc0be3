//! Per-proxy call counters.

use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

use crate::resilience::BreakerState;

#[derive(Debug, Default)]
pub struct ProxyStats {
    pub(crate) total_calls: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
    pub(crate) circuit_opened: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl ProxyStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, breaker_state: Option<BreakerState>, cache_entries: usize) -> StatsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let cache_hit_rate_percent = if lookups == 0 {
            0.0
        } else {
            ((cache_hits as f64 / lookups as f64) * 10_000.0).round() / 100.0
        };

        StatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_opened: self.circuit_opened.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_hit_rate_percent,
            breaker_state,
            cache_entries,
        }
    }
}

/// Serializable view returned by `ResilientCallProxy::stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Calls that passed access control.
    pub total_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limited: u64,
    /// Calls rejected because the breaker was open.
    pub circuit_opened: u64,
    /// Backend calls that failed.
    pub failures: u64,
    /// Hits over lookups, two decimals. Zero before the first lookup.
    pub cache_hit_rate_percent: f64,
    /// `None` when the breaker is disabled.
    pub breaker_state: Option<BreakerState>,
    pub cache_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_rounding() {
        let stats = ProxyStats::default();
        assert_eq!(stats.snapshot(None, 0).cache_hit_rate_percent, 0.0);

        ProxyStats::incr(&stats.cache_hits);
        ProxyStats::incr(&stats.cache_misses);
        ProxyStats::incr(&stats.cache_misses);
        let snap = stats.snapshot(Some(BreakerState::Closed), 2);
        assert_eq!(snap.cache_hit_rate_percent, 33.33);
        assert_eq!(snap.breaker_state, Some(BreakerState::Closed));
    }
}
