//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (durations finite, thresholds >= 1)
//! - Check backend names are unique and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{BackendKind, GuardConfig, ProxySettings};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("duplicate backend name '{0}'")]
    DuplicateBackend(String),
}

impl ValidationError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::invalid(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::invalid("admin.bind_address", "not a socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::invalid("admin.api_key", "must not be empty"));
        }
    }

    validate_settings("defaults", &config.defaults, &mut errors);

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let prefix = format!("backends[{i}]");

        if backend.name.trim().is_empty() {
            errors.push(ValidationError::invalid(format!("{prefix}.name"), "must not be empty"));
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }

        match backend.kind {
            BackendKind::Openai => match backend.base_url.as_deref() {
                Some(url) if Url::parse(url).is_ok() => {}
                Some(_) => errors.push(ValidationError::invalid(
                    format!("{prefix}.base_url"),
                    "not a valid URL",
                )),
                None => errors.push(ValidationError::invalid(
                    format!("{prefix}.base_url"),
                    "required for openai backends",
                )),
            },
            BackendKind::Echo => {
                if !(0.0..=1.0).contains(&backend.failure_rate) {
                    errors.push(ValidationError::invalid(
                        format!("{prefix}.failure_rate"),
                        "must be within [0, 1]",
                    ));
                }
            }
        }

        if backend.timeout_secs == 0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.timeout_secs"),
                "must be greater than 0",
            ));
        }

        if let Some(settings) = &backend.proxy {
            validate_settings(&format!("{prefix}.proxy"), settings, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Largest accepted duration setting: 100 years.
const MAX_DURATION_SECS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

fn validate_settings(prefix: &str, settings: &ProxySettings, errors: &mut Vec<ValidationError>) {
    let mut non_negative = |field: &str, value: f64| {
        if !value.is_finite() || value < 0.0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.{field}"),
                "must be a finite, non-negative number of seconds",
            ));
        } else if value > MAX_DURATION_SECS {
            errors.push(ValidationError::invalid(
                format!("{prefix}.{field}"),
                "must be at most 100 years",
            ));
        }
    };
    non_negative("cache_ttl_secs", settings.cache_ttl_secs);
    non_negative("window_secs", settings.window_secs);
    non_negative("breaker_timeout_secs", settings.breaker_timeout_secs);

    if settings.rate_limit_enabled {
        if settings.window_secs == 0.0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.window_secs"),
                "must be greater than 0",
            ));
        }
        if settings.max_calls_per_window == 0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.max_calls_per_window"),
                "must be at least 1",
            ));
        }
    }

    if settings.circuit_breaker_enabled {
        if settings.failure_threshold == 0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.failure_threshold"),
                "must be at least 1",
            ));
        }
        if settings.success_threshold == 0 {
            errors.push(ValidationError::invalid(
                format!("{prefix}.success_threshold"),
                "must be at least 1",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendProfile;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_capacity_and_ttl_are_allowed() {
        let mut config = GuardConfig::default();
        config.defaults.cache_capacity = 0;
        config.defaults.cache_ttl_secs = 0.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardConfig::default();
        config.defaults.window_secs = 0.0;
        config.defaults.failure_threshold = 0;
        config.defaults.cache_ttl_secs = f64::NAN;

        let mut openai = BackendProfile::echo("chat");
        openai.kind = BackendKind::Openai;
        config.backends.push(openai);
        config.backends.push(BackendProfile::echo("chat"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.contains(&ValidationError::DuplicateBackend("chat".into())));
        assert!(errors
            .iter()
            .any(|e| e.to_string() == "backends[0].base_url: required for openai backends"));
    }

    #[test]
    fn test_durations_beyond_a_century_are_rejected() {
        let mut config = GuardConfig::default();
        config.defaults.cache_ttl_secs = 1e20;
        config.defaults.breaker_timeout_secs = MAX_DURATION_SECS;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::invalid("defaults.cache_ttl_secs", "must be at most 100 years")]
        );
    }

    #[test]
    fn test_disabled_limiter_skips_window_checks() {
        let mut config = GuardConfig::default();
        config.defaults.rate_limit_enabled = false;
        config.defaults.max_calls_per_window = 0;
        assert!(validate_config(&config).is_ok());
    }
}
