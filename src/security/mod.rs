//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy call:
//!     → access_control.rs (every policy must allow the prompt)
//!     → [circuit breaker gate]
//!     → rate_limit.rs (sliding window per key, check-and-record)
//!     → Cache lookup / backend
//! ```
//!
//! # Design Decisions
//! - Fail closed: any policy returning false rejects the call
//! - Policy rejection happens before any state is mutated
//! - Admission is recorded before the backend call and never rolled back

pub mod access_control;
pub mod rate_limit;

pub use access_control::{AccessConfig, AccessPolicy, FnPolicy};
pub use rate_limit::{AdmissionControl, LimiterScope, SlidingWindowLimiter};
