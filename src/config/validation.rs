//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, backoff ordering)
//! - Check endpoint schemes and declared paywalls
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WatcherConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::WatcherConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid URL '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field}: unsupported scheme '{scheme}'")]
    UnsupportedScheme { field: &'static str, scheme: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("subscription.backoff_max_ms ({max}) is below backoff_base_ms ({base})")]
    BackoffRange { base: u64, max: u64 },

    #[error("observability.log_level: unknown level '{0}'")]
    LogLevel(String),

    #[error("observability.metrics_address: invalid socket address '{0}'")]
    MetricsAddress(String),

    #[error("paywalls[{0}]: address is empty")]
    EmptyAddress(usize),

    #[error("paywalls: address '{0}' declared more than once")]
    DuplicateAddress(String),
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &WatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url(
        "subscription.endpoint",
        &config.subscription.endpoint,
        &["ws", "wss"],
        &mut errors,
    );
    check_url(
        "lookup.base_url",
        &config.lookup.base_url,
        &["http", "https"],
        &mut errors,
    );

    let sub = &config.subscription;
    if sub.connect_retries == 0 {
        errors.push(ValidationError::Zero("subscription.connect_retries"));
    }
    if sub.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("subscription.connect_timeout_secs"));
    }
    if sub.backoff_base_ms == 0 {
        errors.push(ValidationError::Zero("subscription.backoff_base_ms"));
    }
    if sub.backoff_max_ms < sub.backoff_base_ms {
        errors.push(ValidationError::BackoffRange {
            base: sub.backoff_base_ms,
            max: sub.backoff_max_ms,
        });
    }
    if sub.event_buffer == 0 {
        errors.push(ValidationError::Zero("subscription.event_buffer"));
    }

    if config.lookup.timeout_secs == 0 {
        errors.push(ValidationError::Zero("lookup.timeout_secs"));
    }
    if config.paywall.lookup_timeout_secs == 0 {
        errors.push(ValidationError::Zero("paywall.lookup_timeout_secs"));
    }
    if config.paywall.max_concurrent_lookups == 0 {
        errors.push(ValidationError::Zero("paywall.max_concurrent_lookups"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(obs.log_level.clone()));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(obs.metrics_address.clone()));
    }

    let mut seen = HashSet::new();
    for (i, paywall) in config.paywalls.iter().enumerate() {
        if paywall.address.trim().is_empty() {
            errors.push(ValidationError::EmptyAddress(i));
        } else if !seen.insert(paywall.address.as_str()) {
            errors.push(ValidationError::DuplicateAddress(paywall.address.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(
    field: &'static str,
    value: &str,
    schemes: &[&str],
    errors: &mut Vec<ValidationError>,
) {
    match url::Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::UnsupportedScheme {
            field,
            scheme: url.scheme().to_string(),
        }),
        Err(_) => errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
