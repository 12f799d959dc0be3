//! Resilient call proxy and its registry.
//!
//! # Data Flow
//! ```text
//! caller
//!     → ProxyRegistry::get_or_create(name)   (one proxy per name)
//!     → ResilientCallProxy::invoke / stream
//!         → access policies → breaker → limiter → cache
//!         → InferenceBackend
//!         → cache store, breaker outcome
//!     → String | ChunkStream | ProxyError
//! ```
//!
//! # Design Decisions
//! - Cache, limiter and breaker are trait objects so each can be swapped in
//!   tests or replaced by a caller's own implementation
//! - Locks inside the components are held only for the synchronous check or
//!   update, never across the backend await
//! - The proxy never retries or sleeps; failures carry `retry_after` and the
//!   caller decides

pub mod error;
pub mod key;
pub mod registry;
pub mod resilient;
pub mod stats;

pub use error::{ProxyError, ProxyResult};
pub use key::RequestKey;
pub use registry::{proxy_from_profile, ProxyRegistry, SyncReport};
pub use resilient::{ProxyBuilder, ResilientCallProxy};
pub use stats::{ProxyStats, StatsSnapshot};
