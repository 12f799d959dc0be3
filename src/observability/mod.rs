//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy, cache, limiter and breaker produce:
//!     → logging.rs (structured log events, one span per call)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every call carries a UUID call id in its span
//! - `getStats` counters live on the proxy; the metrics facade is a
//!   separate, optional export path

pub mod logging;
pub mod metrics;
