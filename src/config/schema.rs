//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! dispatch layer. All types derive Serde traits for deserialization from
//! config files.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Root configuration for the dispatch layer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upstream credentials, in rotation order.
    pub credentials: Vec<CredentialConfig>,

    /// Environment variable holding extra comma-separated secrets.
    pub credentials_env: Option<String>,

    /// Credential pool settings.
    pub pool: PoolConfig,

    /// Retry policy for upstream calls.
    pub retries: RetryConfig,

    /// Circuit breaker policies.
    pub breakers: BreakerConfig,

    /// Operation classes, each with its own idempotency cache.
    pub operations: Vec<OperationConfig>,

    /// Upstream endpoint used by the HTTP adapter.
    pub upstream: UpstreamConfig,

    /// Periodic maintenance.
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            credentials_env: None,
            pool: PoolConfig::default(),
            retries: RetryConfig::default(),
            breakers: BreakerConfig::default(),
            operations: vec![
                OperationConfig {
                    name: "image".to_string(),
                    service: "image".to_string(),
                    cache_ttl_secs: 600,
                    cache_capacity: 1000,
                    cache_enabled: true,
                },
                OperationConfig {
                    name: "video".to_string(),
                    service: "video".to_string(),
                    cache_ttl_secs: 3600,
                    cache_capacity: 500,
                    cache_enabled: true,
                },
            ],
            upstream: UpstreamConfig::default(),
            maintenance: MaintenanceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// One upstream credential.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CredentialConfig {
    /// The secret sent upstream.
    pub secret: String,

    /// Display label; defaults to a masked form of the secret.
    #[serde(default)]
    pub label: Option<String>,
}

/// Credential pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Cooldown after a rate-limit signal when upstream gives no reset hint.
    /// One 60s rate-limit window plus a 5s buffer.
    pub rate_limit_cooldown_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown_secs: 65,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Ceiling for the exponential part of the delay in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the uniform random jitter in milliseconds.
    pub jitter_ms: u64,

    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 8000,
            jitter_ms: 250,
            max_attempts: 5,
        }
    }
}

/// Circuit breaker policy for one service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds after the last failure before the circuit closes again.
    pub reset_timeout_secs: u64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Policy for services without an explicit entry.
    pub default: BreakerPolicy,

    /// Per-service overrides.
    pub services: HashMap<String, BreakerPolicy>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let mut services = HashMap::new();
        // Slow, expensive generations get a stricter breaker and longer reset.
        services.insert(
            "video".to_string(),
            BreakerPolicy {
                failure_threshold: 3,
                reset_timeout_secs: 60,
            },
        );
        Self {
            default: BreakerPolicy::default(),
            services,
        }
    }
}

/// An operation class.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OperationConfig {
    /// Operation name used by callers.
    pub name: String,

    /// Downstream service name (selects the circuit breaker).
    pub service: String,

    /// Idempotency cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum idempotency cache entries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Enable idempotency caching for this operation.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_enabled() -> bool {
    true
}

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL that request paths are joined onto.
    pub base_url: String,

    /// Per-attempt timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Periodic maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between idempotency cache sweeps in seconds.
    pub cache_sweep_interval_secs: u64,

    /// Interval between stats log lines in seconds.
    pub stats_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cache_sweep_interval_secs: 60,
            stats_interval_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
