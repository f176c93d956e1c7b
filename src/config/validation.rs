//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, timeouts > 0)
//! - Detect duplicate credentials and operation names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{BreakerPolicy, DispatchConfig};
use crate::credentials::mask_secret;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a configuration whose credentials have already been resolved.
pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.credentials.is_empty() {
        errors.push(ValidationError::new("credentials", "at least one credential is required"));
    }
    let mut secrets = HashSet::new();
    for (i, credential) in config.credentials.iter().enumerate() {
        if credential.secret.trim().is_empty() {
            errors.push(ValidationError::new(format!("credentials[{i}].secret"), "must not be blank"));
        } else if !secrets.insert(credential.secret.as_str()) {
            errors.push(ValidationError::new(
                format!("credentials[{i}].secret"),
                format!("duplicate credential {}", mask_secret(&credential.secret)),
            ));
        }
    }

    if config.pool.rate_limit_cooldown_secs == 0 {
        errors.push(ValidationError::new("pool.rate_limit_cooldown_secs", "must be greater than 0"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if !(retries.multiplier >= 1.0 && retries.multiplier.is_finite()) {
        errors.push(ValidationError::new("retries.multiplier", "must be a finite number >= 1.0"));
    }
    if retries.initial_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.initial_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    validate_breaker("breakers.default", &config.breakers.default, &mut errors);
    let mut services: Vec<_> = config.breakers.services.iter().collect();
    services.sort_by(|a, b| a.0.cmp(b.0));
    for (name, policy) in services {
        validate_breaker(&format!("breakers.services.{name}"), policy, &mut errors);
    }

    let mut names = HashSet::new();
    for (i, op) in config.operations.iter().enumerate() {
        let field = format!("operations[{i}]");
        if op.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !names.insert(op.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate operation '{}'", op.name),
            ));
        }
        if op.service.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.service"), "must not be empty"));
        }
        if op.cache_ttl_secs == 0 {
            errors.push(ValidationError::new(format!("{field}.cache_ttl_secs"), "must be greater than 0"));
        }
        if op.cache_capacity == 0 {
            errors.push(ValidationError::new(format!("{field}.cache_capacity"), "must be greater than 0"));
        }
    }

    if let Err(e) = url::Url::parse(&config.upstream.base_url) {
        errors.push(ValidationError::new("upstream.base_url", format!("invalid URL: {e}")));
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.request_timeout_secs", "must be greater than 0"));
    }

    if config.maintenance.cache_sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "maintenance.cache_sweep_interval_secs",
            "must be greater than 0",
        ));
    }
    if config.maintenance.stats_interval_secs == 0 {
        errors.push(ValidationError::new("maintenance.stats_interval_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, policy: &BreakerPolicy, errors: &mut Vec<ValidationError>) {
    if policy.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{field}.failure_threshold"), "must be at least 1"));
    }
    if policy.reset_timeout_secs == 0 {
        errors.push(ValidationError::new(format!("{field}.reset_timeout_secs"), "must be greater than 0"));
    }
}
