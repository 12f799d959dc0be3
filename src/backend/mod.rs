//! Inference backend boundary.
//!
//! # Responsibilities
//! - Define the two-operation capability every backend adapts to
//! - Carry call options as an ordered JSON map
//! - Classify backend failures for callers and the circuit breaker
//!
//! # Design Decisions
//! - The proxy only ever sees `InferenceBackend`; concrete clients are
//!   adapted once, at the edge
//! - Backends own their timeouts; a timeout is just another `BackendError`
//! - Streams are finite and not restartable

pub mod echo;
pub mod openai;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{BackendKind, BackendProfile};

pub use echo::EchoBackend;
pub use openai::OpenAiBackend;

/// A lazily produced sequence of text chunks.
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

/// Anything that can complete a prompt.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, BackendError>;

    async fn stream(&self, prompt: &str, options: &InvokeOptions) -> Result<ChunkStream, BackendError>;
}

/// Errors surfaced by a backend. The proxy propagates them unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Build the concrete backend a profile describes.
pub fn build_backend(profile: &BackendProfile) -> Result<Arc<dyn InferenceBackend>, BackendError> {
    match profile.kind {
        BackendKind::Echo => Ok(Arc::new(
            EchoBackend::new()
                .with_latency(Duration::from_millis(profile.latency_ms))
                .with_failure_rate(profile.failure_rate),
        )),
        BackendKind::Openai => {
            let base_url = profile.base_url.as_deref().ok_or_else(|| {
                BackendError::Request(format!("backend '{}' has no base_url", profile.name))
            })?;
            let api_key = match &profile.api_key_env {
                Some(var) => {
                    let key = std::env::var(var).ok();
                    if key.is_none() {
                        tracing::warn!(backend = %profile.name, env = %var, "API key variable not set");
                    }
                    key
                }
                None => None,
            };
            Ok(Arc::new(OpenAiBackend::new(
                base_url,
                profile.model.clone(),
                api_key,
                Duration::from_secs(profile.timeout_secs),
            )?))
        }
    }
}

/// Per-call options (model, temperature, max tokens, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvokeOptions(BTreeMap<String, Value>);

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.with("model", model.into())
    }

    pub fn with_temperature(self, temperature: f64) -> Self {
        self.with("temperature", temperature)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn model(&self) -> Option<&str> {
        self.0.get("model").and_then(Value::as_str)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.0.get("temperature").and_then(Value::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for InvokeOptions {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for InvokeOptions {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_accessors() {
        let options = InvokeOptions::new()
            .with_model("gpt-4o-mini")
            .with_temperature(0.2)
            .with("max_tokens", 64);

        assert_eq!(options.model(), Some("gpt-4o-mini"));
        assert_eq!(options.temperature(), Some(0.2));
        assert_eq!(options.get("max_tokens"), Some(&json!(64)));
        assert_eq!(options.len(), 3);
    }

    #[test]
    fn test_options_deserialize_from_object() {
        let options: InvokeOptions =
            serde_json::from_value(json!({"model": "m", "temperature": 0.0})).unwrap();
        assert_eq!(options.model(), Some("m"));
        assert_eq!(options.temperature(), Some(0.0));
    }

    #[tokio::test]
    async fn test_build_backend_from_profile() {
        let echo = build_backend(&BackendProfile::echo("local")).unwrap();
        assert_eq!(echo.invoke("hi", &InvokeOptions::new()).await.unwrap(), "echo: hi");

        let mut openai = BackendProfile::echo("remote");
        openai.kind = BackendKind::Openai;
        assert!(matches!(build_backend(&openai), Err(BackendError::Request(_))));
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::Status {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "backend returned status 503: overloaded");
        assert!(BackendError::Timeout(Duration::from_secs(30))
            .to_string()
            .contains("30s"));
    }
}
