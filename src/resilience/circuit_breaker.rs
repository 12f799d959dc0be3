//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed degraded, calls fail fast
//! - Half-Open: trial calls allowed to probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: timeout elapsed since opened_at (checked lazily)
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! Half-Open admits at most `success_threshold` trial calls. Trials that never
//! report back (cancelled callers) free their slots once another `timeout`
//! has passed.
//!
//! # Design Decisions
//! - One breaker per proxy, no global registry of breakers
//! - No timers: the Open → Half-Open move happens on the next
//!   `can_execute` or `record_failure`
//! - A success while Closed forgives earlier failures

use std::sync::Mutex;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::observability::metrics;

/// Breaker seam injected into the proxy.
pub trait FailureGate: Send + Sync {
    fn can_execute(&self) -> bool;
    fn record_success(&self);
    fn record_failure(&self);
    fn state(&self) -> BreakerState;
    /// How long until an open breaker admits a trial call.
    fn retry_after(&self) -> Duration;
    fn reset(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Point-in-time view of a breaker, for stats and the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the last recorded failure.
    pub last_failure_secs_ago: Option<f64>,
    /// Seconds until an open breaker admits a trial call.
    pub retry_after_secs: f64,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_opened_at: Option<Instant>,
    trials_admitted: u32,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            half_opened_at: None,
            trials_admitted: 0,
        }
    }

    fn timeout_elapsed(&self, now: Instant, timeout: Duration) -> bool {
        self.opened_at
            .map_or(true, |opened| now.duration_since(opened) >= timeout)
    }

    fn trials_exhausted(&self, config: &BreakerConfig) -> bool {
        self.trials_admitted >= config.success_threshold
    }

    /// Take a Half-Open trial slot if one is free.
    fn admit_trial(&mut self, now: Instant, config: &BreakerConfig) -> bool {
        if !self.trials_exhausted(config) {
            self.trials_admitted += 1;
            return true;
        }
        let stale = self
            .half_opened_at
            .map_or(true, |at| now.duration_since(at) >= config.timeout);
        if stale {
            self.half_opened_at = Some(now);
            self.trials_admitted = 1;
        }
        stale
    }

    fn retry_after(&self, now: Instant, config: &BreakerConfig) -> Duration {
        let since = match self.state {
            BreakerState::Open => self.opened_at,
            BreakerState::HalfOpen if self.trials_exhausted(config) => self.half_opened_at,
            _ => None,
        };
        since.map_or(Duration::ZERO, |at| {
            config.timeout.saturating_sub(now.duration_since(at))
        })
    }
}

/// Three-state failure isolation for one protected backend.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a call may proceed.
    ///
    /// An open breaker whose timeout has elapsed moves to Half-Open here.
    /// In Half-Open each `true` takes one trial slot.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => inner.admit_trial(now, &self.config),
            BreakerState::Open => {
                if inner.timeout_elapsed(now, self.config.timeout) {
                    self.transition(&mut inner, BreakerState::HalfOpen, now);
                    inner.admit_trial(now, &self.config)
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            // A call admitted before the breaker opened finished late.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);

        if inner.state == BreakerState::Open && inner.timeout_elapsed(now, self.config.timeout) {
            self.transition(&mut inner, BreakerState::HalfOpen, now);
        }

        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn retry_after(&self) -> Duration {
        let now = Instant::now();
        self.inner
            .lock()
            .expect("circuit breaker mutex poisoned")
            .retry_after(now, &self.config)
    }

    pub fn status(&self) -> BreakerStatus {
        let now = Instant::now();
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        BreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_secs_ago: inner
                .last_failure_at
                .map(|at| now.duration_since(at).as_secs_f64()),
            retry_after_secs: inner.retry_after(now, &self.config).as_secs_f64(),
        }
    }

    /// Force the breaker back to Closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        *inner = BreakerInner::closed();
        metrics::record_breaker_state(&self.name, BreakerState::Closed);
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(now);
                inner.success_count = 0;
                inner.half_opened_at = None;
                inner.trials_admitted = 0;
                tracing::warn!(
                    breaker = %self.name,
                    from = %from,
                    failures = inner.failure_count,
                    timeout_secs = self.config.timeout.as_secs_f64(),
                    "Circuit opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.success_count = 0;
                inner.half_opened_at = Some(now);
                inner.trials_admitted = 0;
                tracing::info!(breaker = %self.name, "Circuit half-open, allowing trial calls");
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.opened_at = None;
                inner.half_opened_at = None;
                inner.trials_admitted = 0;
                tracing::info!(breaker = %self.name, "Circuit closed");
            }
        }
        metrics::record_breaker_state(&self.name, to);
    }
}

impl FailureGate for CircuitBreaker {
    fn can_execute(&self) -> bool {
        CircuitBreaker::can_execute(self)
    }

    fn record_success(&self) {
        CircuitBreaker::record_success(self)
    }

    fn record_failure(&self) {
        CircuitBreaker::record_failure(self)
    }

    fn state(&self) -> BreakerState {
        CircuitBreaker::state(self)
    }

    fn retry_after(&self) -> Duration {
        CircuitBreaker::retry_after(self)
    }

    fn reset(&self) {
        CircuitBreaker::reset(self)
    }
}
