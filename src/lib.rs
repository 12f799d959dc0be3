//! Resilience proxy for inference backends.
//!
//! Wraps any [`InferenceBackend`] in a [`ResilientCallProxy`] that layers
//! access control, a circuit breaker, a sliding-window rate limiter and an
//! expiring LRU response cache in front of it. A [`ProxyRegistry`] hands out
//! one shared proxy per backend name.

// Core
pub mod backend;
pub mod proxy;

// Policy components
pub mod cache;
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod observability;

pub use backend::{BackendError, InferenceBackend, InvokeOptions};
pub use config::{GuardConfig, ProxySettings};
pub use proxy::{ProxyError, ProxyRegistry, ResilientCallProxy, StatsSnapshot};
