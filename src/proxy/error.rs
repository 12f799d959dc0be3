//! Failure taxonomy of a proxied call.

use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;
use crate::resilience::BreakerState;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// A policy rejected the inputs. Retrying unchanged will fail again.
    #[error("access denied by policy '{policy}'")]
    AccessDenied { policy: String },

    /// The breaker is failing fast; the backend looks degraded.
    #[error("circuit open, retry after {:.1}s", .retry_after.as_secs_f64())]
    CircuitOpen {
        retry_after: Duration,
        state: BreakerState,
    },

    /// The sliding window for this key is full.
    #[error("rate limited, retry after {:.1}s", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    /// The backend's own failure, unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// Suggested delay for transient rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProxyError::CircuitOpen { retry_after, .. } | ProxyError::RateLimited { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Whether the same call may succeed later without changing its inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::AccessDenied { .. } => false,
            ProxyError::CircuitOpen { .. } | ProxyError::RateLimited { .. } => true,
            ProxyError::Backend(e) => !matches!(e, BackendError::Decode(_)),
        }
    }

    /// Short static label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::AccessDenied { .. } => "access_denied",
            ProxyError::CircuitOpen { .. } => "circuit_open",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::Backend(_) => "backend_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::RateLimited {
            retry_after: Duration::from_millis(59_000),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 59.0s");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(59)));

        let err = ProxyError::AccessDenied {
            policy: "blocked_terms".into(),
        };
        assert_eq!(err.to_string(), "access denied by policy 'blocked_terms'");
        assert!(!err.is_retryable());
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: ProxyError = BackendError::Unavailable("down".into()).into();
        assert_eq!(err.to_string(), "backend unavailable: down");
        assert_eq!(err.kind(), "backend_error");
        assert!(err.is_retryable());
    }
}
