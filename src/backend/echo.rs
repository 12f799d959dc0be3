//! Local echo backend for demos and smoke tests.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::backend::{BackendError, ChunkStream, InferenceBackend, InvokeOptions};

/// Replies with `"echo: <prompt>"`, optionally slowly and optionally failing.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    latency: Duration,
    failure_rate: f64,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fraction of calls, in `[0, 1]`, that fail with `Unavailable`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    async fn simulate(&self) -> Result<(), BackendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 && fastrand::f64() < self.failure_rate {
            return Err(BackendError::Unavailable("injected echo failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn invoke(&self, prompt: &str, _options: &InvokeOptions) -> Result<String, BackendError> {
        self.simulate().await?;
        Ok(format!("echo: {}", prompt))
    }

    async fn stream(&self, prompt: &str, _options: &InvokeOptions) -> Result<ChunkStream, BackendError> {
        self.simulate().await?;
        let mut chunks = vec!["echo: ".to_string()];
        chunks.extend(prompt.split_inclusive(' ').map(str::to_string));
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_invoke() {
        let backend = EchoBackend::new();
        let out = backend.invoke("hello", &InvokeOptions::new()).await.unwrap();
        assert_eq!(out, "echo: hello");
    }

    #[tokio::test]
    async fn test_echo_stream_concatenates_to_invoke() {
        let backend = EchoBackend::new();
        let chunks: Vec<String> = backend
            .stream("one two three", &InvokeOptions::new())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), "echo: one two three");
    }

    #[tokio::test]
    async fn test_echo_always_fails_at_rate_one() {
        let backend = EchoBackend::new().with_failure_rate(1.0);
        let err = backend.invoke("x", &InvokeOptions::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
