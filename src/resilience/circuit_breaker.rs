//! Circuit breaker for upstream service protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Closed: reset timeout elapsed since last failure (checked on read)
//! Any → Closed: a successful call
//! ```
//!
//! There is no half-open trial state. The first call after the reset
//! timeout is let through and its outcome closes or re-opens the circuit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{BreakerConfig, BreakerPolicy};
use crate::observability::metrics;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Consecutive-failure circuit breaker for one named service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerStats {
    pub name: String,
    pub open: bool,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl CircuitBreaker {
    /// Create a closed breaker. A threshold of zero is treated as one.
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn from_policy(name: impl Into<String>, policy: &BreakerPolicy) -> Self {
        Self::new(
            name,
            policy.failure_threshold,
            Duration::from_secs(policy.reset_timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether calls should currently fail fast.
    ///
    /// If the reset timeout has elapsed since the last failure, this read
    /// closes the circuit and clears the failure counter.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }

        let elapsed = state
            .last_failure
            .map(|at| Instant::now().saturating_duration_since(at))
            .unwrap_or(self.reset_timeout);
        if elapsed >= self.reset_timeout {
            state.open = false;
            state.consecutive_failures = 0;
            tracing::info!(service = %self.name, "Circuit reset timeout elapsed, closing circuit");
            metrics::record_circuit_state(&self.name, false);
            return false;
        }
        true
    }

    /// Record a failed call; opens the circuit once the threshold is reached.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());

        if !state.open && state.consecutive_failures >= self.failure_threshold {
            state.open = true;
            tracing::warn!(
                service = %self.name,
                failures = state.consecutive_failures,
                reset_timeout_secs = self.reset_timeout.as_secs(),
                "Circuit opened"
            );
            metrics::record_circuit_state(&self.name, true);
        }
    }

    /// Record a successful call; closes the circuit.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.open {
            tracing::info!(service = %self.name, "Call succeeded, closing circuit");
            metrics::record_circuit_state(&self.name, false);
        }
        state.open = false;
        state.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Snapshot without applying the lazy reset.
    pub fn stats(&self) -> BreakerStats {
        let state = self.lock();
        BreakerStats {
            name: self.name.clone(),
            open: state.open,
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.failure_threshold,
            reset_timeout_secs: self.reset_timeout.as_secs(),
        }
    }
}

/// One breaker per downstream service name, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_policy: BreakerPolicy,
    service_policies: HashMap<String, BreakerPolicy>,
}

impl BreakerRegistry {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_policy: config.default.clone(),
            service_policies: config.services.clone(),
        }
    }

    /// Policy that applies to a service.
    pub fn policy_for(&self, service: &str) -> &BreakerPolicy {
        self.service_policies
            .get(service)
            .unwrap_or(&self.default_policy)
    }

    /// Breaker for a service, creating it from its policy if needed.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                tracing::debug!(service = %service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::from_policy(service, self.policy_for(service)))
            })
            .clone()
    }

    /// Stats for every breaker created so far, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_resets() {
        let breaker = CircuitBreaker::new("image", 3, Duration::from_secs(30));

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_close_after_timeout() {
        let breaker = CircuitBreaker::new("video", 3, Duration::from_secs(60));
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.is_open());
        assert!(breaker.stats().open);

        tokio::time::advance(Duration::from_secs(1)).await;
        // Still flagged until something reads it.
        assert!(breaker.stats().open);
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.stats().open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_extends_window() {
        let breaker = CircuitBreaker::new("svc", 1, Duration::from_secs(30));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(breaker.is_open());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_zero_threshold_treated_as_one() {
        let breaker = CircuitBreaker::new("svc", 0, Duration::from_secs(30));
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_registry_uses_service_policy() {
        let registry = BreakerRegistry::new(&BreakerConfig::default());
        let video = registry.get("video");
        let video_again = registry.get("video");
        assert!(Arc::ptr_eq(&video, &video_again));

        let video_stats = video.stats();
        assert_eq!(video_stats.failure_threshold, 3);
        assert_eq!(video_stats.reset_timeout_secs, 60);

        let other = registry.get("chat");
        assert_eq!(other.stats().failure_threshold, 5);
        assert_eq!(other.stats().reset_timeout_secs, 30);

        let names: Vec<String> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["chat", "video"]);
    }
}
