//! Sliding-window admission control.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Admission seam injected into the proxy.
///
/// `try_acquire` is the only call the proxy makes on the hot path; it must
/// check and record in one step.
pub trait AdmissionControl: Send + Sync {
    fn try_acquire(&self, key: &str) -> bool;
    fn wait_time(&self, key: &str) -> Duration;
}

/// What the limiter keys calls on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    /// One window per derived request key (prompt + options).
    #[default]
    Request,
    /// One window shared by every call through the proxy.
    Proxy,
}

/// Key count below which only the once-per-window sweep runs.
const SWEEP_HIGH_WATER: usize = 1024;

/// Bounds calls per key to `max_calls` within any trailing `window`.
///
/// Keys whose calls have all left the window are swept out while recording,
/// at most once per window or whenever the key count doubles.
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<CallLogs>,
}

struct CallLogs {
    logs: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
    high_water: usize,
}

impl CallLogs {
    fn sweep_if_due(&mut self, now: Instant, window: Duration) {
        let due = self.logs.len() > self.high_water
            || now.duration_since(self.last_sweep) >= window;
        if !due {
            return;
        }
        self.sweep(now, window);
        self.high_water = (self.logs.len() * 2).max(SWEEP_HIGH_WATER);
    }

    fn sweep(&mut self, now: Instant, window: Duration) {
        self.logs.retain(|_, log| {
            prune(log, now, window);
            !log.is_empty()
        });
        self.last_sweep = now;
    }
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(CallLogs {
                logs: HashMap::new(),
                last_sweep: Instant::now(),
                high_water: SWEEP_HIGH_WATER,
            }),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a call for `key` would be admitted right now. Records nothing.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().expect("rate limiter mutex poisoned");
        match calls.logs.get_mut(key) {
            Some(log) => {
                prune(log, now, self.window);
                log.len() < self.max_calls
            }
            None => self.max_calls > 0,
        }
    }

    /// Record a call for `key` without checking the limit.
    pub fn record_call(&self, key: &str) {
        let now = Instant::now();
        let mut calls = self.calls.lock().expect("rate limiter mutex poisoned");
        calls.sweep_if_due(now, self.window);
        calls.logs.entry(key.to_string()).or_default().push_back(now);
    }

    /// Check and record in a single critical section.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().expect("rate limiter mutex poisoned");
        calls.sweep_if_due(now, self.window);
        let log = calls.logs.entry(key.to_string()).or_default();
        prune(log, now, self.window);

        if log.len() < self.max_calls {
            log.push_back(now);
            true
        } else {
            if log.is_empty() {
                calls.logs.remove(key);
            }
            false
        }
    }

    /// Time until the oldest call in the window falls out of it.
    ///
    /// Zero when the key currently has headroom.
    pub fn wait_time(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut calls = self.calls.lock().expect("rate limiter mutex poisoned");
        let Some(log) = calls.logs.get_mut(key) else {
            return Duration::ZERO;
        };
        prune(log, now, self.window);

        if log.len() < self.max_calls {
            return Duration::ZERO;
        }
        match log.front() {
            Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
            None => Duration::ZERO,
        }
    }

    /// Forget the call log of one key.
    pub fn reset(&self, key: &str) {
        self.calls.lock().expect("rate limiter mutex poisoned").logs.remove(key);
    }

    pub fn clear(&self) {
        self.calls.lock().expect("rate limiter mutex poisoned").logs.clear();
    }

    /// Number of keys with at least one call still inside the window.
    pub fn tracked_keys(&self) -> usize {
        let now = Instant::now();
        let mut calls = self.calls.lock().expect("rate limiter mutex poisoned");
        calls.sweep(now, self.window);
        calls.logs.len()
    }

    #[cfg(test)]
    fn stored_keys(&self) -> usize {
        self.calls.lock().expect("rate limiter mutex poisoned").logs.len()
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn try_acquire(&self, key: &str) -> bool {
        SlidingWindowLimiter::try_acquire(self, key)
    }

    fn wait_time(&self, key: &str) -> Duration {
        SlidingWindowLimiter::wait_time(self, key)
    }
}

/// Drop timestamps that are no longer inside the trailing window.
fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.duration_since(oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}
