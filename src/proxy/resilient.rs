//! The resilient call proxy.
//!
//! # Call Path
//! ```text
//! invoke(prompt, options)
//!     → access policies      (AccessDenied, nothing mutated)
//!     → breaker.can_execute  (CircuitOpen)
//!     → limiter.try_acquire  (RateLimited)
//!     → cache.get            (hit: return, breaker untouched)
//!     → backend.invoke
//!     → cache.put + breaker.record_success | breaker.record_failure
//! ```
//!
//! `stream` shares the first three steps, skips the cache, and reports to
//! the breaker once the stream ends or errors. A stream dropped part way
//! reports nothing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::backend::{BackendError, ChunkStream, InferenceBackend, InvokeOptions};
use crate::cache::{ResponseCache, SharedLruCache};
use crate::config::ProxySettings;
use crate::observability::metrics;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::key::RequestKey;
use crate::proxy::stats::{ProxyStats, StatsSnapshot};
use crate::resilience::{BreakerState, CircuitBreaker, FailureGate};
use crate::security::{AccessPolicy, AdmissionControl, LimiterScope, SlidingWindowLimiter};

/// Cache, limiter and circuit breaker composed around one backend.
pub struct ResilientCallProxy {
    name: String,
    backend: Arc<dyn InferenceBackend>,
    settings: ProxySettings,
    cache: Option<Arc<dyn ResponseCache>>,
    limiter: Option<Arc<dyn AdmissionControl>>,
    breaker: Option<Arc<dyn FailureGate>>,
    policies: Vec<Box<dyn AccessPolicy>>,
    stats: Arc<ProxyStats>,
}

impl ResilientCallProxy {
    /// Proxy with the stock cache, limiter and breaker described by `settings`.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
        settings: ProxySettings,
    ) -> Self {
        Self::builder(name, backend).settings(settings).build()
    }

    pub fn builder(name: impl Into<String>, backend: Arc<dyn InferenceBackend>) -> ProxyBuilder {
        ProxyBuilder {
            name: name.into(),
            backend,
            settings: ProxySettings::default(),
            cache: None,
            limiter: None,
            breaker: None,
            policies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Run one call through the guards and, on a cache miss, the backend.
    #[tracing::instrument(
        name = "proxy.invoke",
        level = "debug",
        skip_all,
        fields(proxy = %self.name, call_id = %Uuid::new_v4())
    )]
    pub async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> ProxyResult<String> {
        let key = self.admit(prompt, options)?;

        if let Some(cache) = &self.cache {
            let hit = cache.get(key.as_str());
            metrics::record_cache_lookup(&self.name, hit.is_some());
            if let Some(value) = hit {
                ProxyStats::incr(&self.stats.cache_hits);
                metrics::record_call(&self.name, "cache_hit");
                tracing::debug!(key = %key, "Cache hit");
                return Ok(value);
            }
            ProxyStats::incr(&self.stats.cache_misses);
        }

        let started = Instant::now();
        let result = self.backend.invoke(prompt, options).await;
        metrics::record_backend_duration(&self.name, started);

        match result {
            Ok(value) => {
                if let Some(cache) = &self.cache {
                    cache.put(key.as_str().to_string(), value.clone());
                }
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                metrics::record_call(&self.name, "success");
                Ok(value)
            }
            Err(e) => {
                self.record_backend_failure(&e);
                Err(ProxyError::Backend(e))
            }
        }
    }

    /// Open a guarded stream. Admission failures are returned before any
    /// chunk is produced.
    #[tracing::instrument(
        name = "proxy.stream",
        level = "debug",
        skip_all,
        fields(proxy = %self.name, call_id = %Uuid::new_v4())
    )]
    pub async fn stream(&self, prompt: &str, options: &InvokeOptions) -> ProxyResult<ChunkStream> {
        self.admit(prompt, options)?;

        let started = Instant::now();
        match self.backend.stream(prompt, options).await {
            Ok(inner) => Ok(GuardedStream {
                inner,
                proxy: self.name.clone(),
                breaker: self.breaker.clone(),
                stats: self.stats.clone(),
                started,
                finished: false,
            }
            .boxed()),
            Err(e) => {
                self.record_backend_failure(&e);
                Err(ProxyError::Backend(e))
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.breaker_state(),
            self.cache.as_ref().map_or(0, |cache| cache.len()),
        )
    }

    /// `None` when the breaker is disabled.
    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.breaker.as_ref().map(|breaker| breaker.state())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            tracing::info!(proxy = %self.name, "Cache cleared");
        }
    }

    pub fn reset_breaker(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.reset();
        }
    }

    /// Access check, breaker gate and rate limit, in that order.
    fn admit(&self, prompt: &str, options: &InvokeOptions) -> ProxyResult<RequestKey> {
        if let Some(policy) = self.policies.iter().find(|p| !p.allows(prompt, options)) {
            metrics::record_access_denied(&self.name, policy.name());
            tracing::warn!(policy = policy.name(), "Access denied");
            return Err(ProxyError::AccessDenied {
                policy: policy.name().to_string(),
            });
        }

        ProxyStats::incr(&self.stats.total_calls);

        if let Some(breaker) = &self.breaker {
            if !breaker.can_execute() {
                ProxyStats::incr(&self.stats.circuit_opened);
                metrics::record_circuit_rejected(&self.name);
                let retry_after = breaker.retry_after();
                tracing::debug!(retry_after = ?retry_after, "Circuit open, failing fast");
                return Err(ProxyError::CircuitOpen {
                    retry_after,
                    state: breaker.state(),
                });
            }
        }

        let key = RequestKey::derive(prompt, options);

        if let Some(limiter) = &self.limiter {
            let limiter_key = match self.settings.limiter_scope {
                LimiterScope::Request => key.as_str(),
                LimiterScope::Proxy => self.name.as_str(),
            };
            if !limiter.try_acquire(limiter_key) {
                ProxyStats::incr(&self.stats.rate_limited);
                metrics::record_rate_limited(&self.name);
                let retry_after = limiter.wait_time(limiter_key);
                tracing::warn!(retry_after = ?retry_after, "Rate limit exceeded");
                return Err(ProxyError::RateLimited { retry_after });
            }
        }

        Ok(key)
    }

    fn record_backend_failure(&self, err: &BackendError) {
        ProxyStats::incr(&self.stats.failures);
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
        metrics::record_call(&self.name, "backend_error");
        tracing::warn!(error = %err, "Backend call failed");
    }
}

/// Builder for a [`ResilientCallProxy`] with injected components.
///
/// The enable flags in the settings decide which guards exist; an injected
/// component replaces the stock one for an enabled guard.
pub struct ProxyBuilder {
    name: String,
    backend: Arc<dyn InferenceBackend>,
    settings: ProxySettings,
    cache: Option<Arc<dyn ResponseCache>>,
    limiter: Option<Arc<dyn AdmissionControl>>,
    breaker: Option<Arc<dyn FailureGate>>,
    policies: Vec<Box<dyn AccessPolicy>>,
}

impl ProxyBuilder {
    pub fn settings(mut self, settings: ProxySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn AdmissionControl>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn breaker(mut self, breaker: Arc<dyn FailureGate>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn access_policy(mut self, policy: impl AccessPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn access_policies(mut self, policies: Vec<Box<dyn AccessPolicy>>) -> Self {
        self.policies.extend(policies);
        self
    }

    pub fn build(self) -> ResilientCallProxy {
        let settings = self.settings;

        let cache = settings.cache_enabled.then(|| {
            self.cache.unwrap_or_else(|| {
                Arc::new(SharedLruCache::new(settings.cache_capacity, settings.cache_ttl()))
                    as Arc<dyn ResponseCache>
            })
        });
        let limiter = settings.rate_limit_enabled.then(|| {
            self.limiter.unwrap_or_else(|| {
                Arc::new(SlidingWindowLimiter::new(
                    settings.max_calls_per_window,
                    settings.window(),
                )) as Arc<dyn AdmissionControl>
            })
        });
        let breaker = settings.circuit_breaker_enabled.then(|| {
            self.breaker.unwrap_or_else(|| {
                Arc::new(CircuitBreaker::new(self.name.clone(), settings.breaker_config()))
                    as Arc<dyn FailureGate>
            })
        });

        tracing::debug!(
            proxy = %self.name,
            cache = cache.is_some(),
            rate_limit = limiter.is_some(),
            circuit_breaker = breaker.is_some(),
            policies = self.policies.len(),
            "Proxy created"
        );

        ResilientCallProxy {
            name: self.name,
            backend: self.backend,
            settings,
            cache,
            limiter,
            breaker,
            policies: self.policies,
            stats: Arc::new(ProxyStats::default()),
        }
    }
}

/// Reports a stream's outcome to the breaker exactly once.
struct GuardedStream {
    inner: ChunkStream,
    proxy: String,
    breaker: Option<Arc<dyn FailureGate>>,
    stats: Arc<ProxyStats>,
    started: Instant,
    finished: bool,
}

impl GuardedStream {
    fn finish(&mut self, error: Option<&BackendError>) {
        self.finished = true;
        metrics::record_backend_duration(&self.proxy, self.started);
        match error {
            None => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                metrics::record_call(&self.proxy, "success");
            }
            Some(e) => {
                ProxyStats::incr(&self.stats.failures);
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
                metrics::record_call(&self.proxy, "backend_error");
                tracing::warn!(proxy = %self.proxy, error = %e, "Stream failed");
            }
        }
    }
}

impl Stream for GuardedStream {
    type Item = Result<String, BackendError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                this.finish(Some(&e));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(proxy = %self.proxy, "Stream dropped before completion, breaker untouched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;

    fn all_disabled() -> ProxySettings {
        ProxySettings {
            cache_enabled: false,
            rate_limit_enabled: false,
            circuit_breaker_enabled: false,
            ..ProxySettings::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_guards_pass_through() {
        let proxy = ResilientCallProxy::new("p", Arc::new(EchoBackend::new()), all_disabled());

        for _ in 0..3 {
            assert_eq!(proxy.invoke("hi", &InvokeOptions::new()).await.unwrap(), "echo: hi");
        }

        let stats = proxy.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
        assert_eq!(stats.breaker_state, None);
        assert_eq!(proxy.breaker_state(), None);
    }

    #[tokio::test]
    async fn test_injected_breaker_is_used() {
        let breaker = Arc::new(CircuitBreaker::new("shared", Default::default()));
        let proxy = ResilientCallProxy::builder("p", Arc::new(EchoBackend::new()))
            .settings(ProxySettings {
                circuit_breaker_enabled: true,
                ..all_disabled()
            })
            .breaker(breaker.clone())
            .build();

        for _ in 0..5 {
            breaker.record_failure();
        }
        let err = proxy.invoke("hi", &InvokeOptions::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::CircuitOpen { state: BreakerState::Open, .. }));
    }

    #[tokio::test]
    async fn test_injected_component_ignored_when_disabled() {
        let cache = Arc::new(SharedLruCache::new(8, std::time::Duration::from_secs(60)));
        let proxy = ResilientCallProxy::builder("p", Arc::new(EchoBackend::new()))
            .settings(all_disabled())
            .cache(cache.clone())
            .build();

        proxy.invoke("hi", &InvokeOptions::new()).await.unwrap();
        assert!(cache.is_empty());
    }
}
