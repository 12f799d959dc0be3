//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy call:
//!     → circuit_breaker.rs can_execute (fail fast while open)
//!     → backend call
//!     → circuit_breaker.rs record_success / record_failure
//! ```
//!
//! # Design Decisions
//! - Cache hits never touch the breaker; they say nothing about backend health
//! - Timeouts belong to the backend and arrive here as ordinary failures
//! - No retries: the caller gets `retry_after` and decides

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerConfig, BreakerState, BreakerStatus, CircuitBreaker, FailureGate};
