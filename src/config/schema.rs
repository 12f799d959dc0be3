//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::observability::logging::LogFormat;
use crate::resilience::BreakerConfig;
use crate::security::{AccessConfig, LimiterScope};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Proxy settings for backends without their own `[backends.proxy]` table.
    pub defaults: ProxySettings,

    /// Named backends, one proxy each.
    pub backends: Vec<BackendProfile>,
}

impl GuardConfig {
    pub fn backend(&self, name: &str) -> Option<&BackendProfile> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Effective proxy settings for a backend.
    pub fn settings_for(&self, profile: &BackendProfile) -> ProxySettings {
        profile.proxy.clone().unwrap_or_else(|| self.defaults.clone())
    }
}

/// Cache, limiter and breaker settings for one proxy instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    pub cache_enabled: bool,

    /// Maximum cached responses. Zero disables storage.
    pub cache_capacity: usize,

    /// Seconds a cached response stays fresh. Zero disables reads.
    pub cache_ttl_secs: f64,

    pub rate_limit_enabled: bool,

    /// Calls admitted per key within any trailing window.
    pub max_calls_per_window: usize,

    /// Window length in seconds.
    pub window_secs: f64,

    /// What the limiter keys on.
    pub limiter_scope: LimiterScope,

    pub circuit_breaker_enabled: bool,

    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a trial call.
    pub breaker_timeout_secs: f64,

    /// Trial successes needed to close a half-open breaker.
    pub success_threshold: u32,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: 1000,
            cache_ttl_secs: 3600.0,
            rate_limit_enabled: true,
            max_calls_per_window: 60,
            window_secs: 60.0,
            limiter_scope: LimiterScope::Request,
            circuit_breaker_enabled: true,
            failure_threshold: 5,
            breaker_timeout_secs: 60.0,
            success_threshold: 2,
        }
    }
}

impl ProxySettings {
    pub fn cache_ttl(&self) -> Duration {
        seconds(self.cache_ttl_secs)
    }

    pub fn window(&self) -> Duration {
        seconds(self.window_secs)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: seconds(self.breaker_timeout_secs),
            success_threshold: self.success_threshold,
        }
    }
}

/// Seconds to a `Duration`. Negative and NaN become zero; values too large
/// to represent, infinity included, saturate to `Duration::MAX`.
fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local echo backend.
    #[default]
    Echo,
    /// OpenAI-compatible chat completions endpoint.
    Openai,
}

/// A named backend and the proxy that guards it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendProfile {
    /// Registry name (e.g., "chat-prod").
    pub name: String,

    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL for `openai` backends (e.g., "https://api.openai.com/v1").
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model used when a call does not name one.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// HTTP timeout for `openai` backends.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Artificial latency for `echo` backends.
    #[serde(default)]
    pub latency_ms: u64,

    /// Injected failure fraction for `echo` backends.
    #[serde(default)]
    pub failure_rate: f64,

    /// Full proxy settings override. Missing fields take built-in defaults.
    #[serde(default)]
    pub proxy: Option<ProxySettings>,

    /// Access-control policies for this proxy.
    #[serde(default)]
    pub access: AccessConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

impl BackendProfile {
    /// Echo profile with defaults, handy for tests and demos.
    pub fn echo(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: BackendKind::Echo,
            base_url: None,
            model: default_model(),
            api_key_env: None,
            timeout_secs: default_backend_timeout(),
            latency_ms: 0,
            failure_rate: 0.0,
            proxy: None,
            access: AccessConfig::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config, GuardConfig::default());
        assert_eq!(config.defaults.max_calls_per_window, 60);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_full_backend_profile() {
        let config: GuardConfig = toml::from_str(
            r#"
            [defaults]
            cache_ttl_secs = 120.5
            limiter_scope = "proxy"

            [[backends]]
            name = "chat"
            kind = "openai"
            base_url = "http://localhost:8000/v1"
            api_key_env = "OPENAI_API_KEY"

            [backends.proxy]
            failure_threshold = 2
            breaker_timeout_secs = 10

            [backends.access]
            allowed_models = ["gpt-4o-mini"]

            [[backends]]
            name = "local"
            "#,
        )
        .unwrap();

        assert_eq!(config.defaults.cache_ttl(), Duration::from_secs_f64(120.5));
        assert_eq!(config.defaults.limiter_scope, LimiterScope::Proxy);

        let chat = config.backend("chat").unwrap();
        assert_eq!(chat.kind, BackendKind::Openai);
        assert_eq!(chat.timeout_secs, 30);
        let settings = config.settings_for(chat);
        assert_eq!(settings.failure_threshold, 2);
        assert_eq!(settings.breaker_config().timeout, Duration::from_secs(10));
        assert_eq!(settings.limiter_scope, LimiterScope::Request);
        assert_eq!(chat.access.allowed_models, vec!["gpt-4o-mini".to_string()]);

        let local = config.backend("local").unwrap();
        assert_eq!(local.kind, BackendKind::Echo);
        assert_eq!(config.settings_for(local), config.defaults);
    }

    #[test]
    fn test_oversized_durations_saturate() {
        let settings = ProxySettings {
            cache_ttl_secs: f64::INFINITY,
            window_secs: 1e20,
            breaker_timeout_secs: f64::MAX,
            ..ProxySettings::default()
        };
        assert_eq!(settings.cache_ttl(), Duration::MAX);
        assert_eq!(settings.window(), Duration::MAX);
        assert_eq!(settings.breaker_config().timeout, Duration::MAX);

        let settings = ProxySettings {
            cache_ttl_secs: -1.0,
            window_secs: f64::NAN,
            ..ProxySettings::default()
        };
        assert_eq!(settings.cache_ttl(), Duration::ZERO);
        assert_eq!(settings.window(), Duration::ZERO);
    }
}
