//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::config::RetryConfig;

/// Immutable retry configuration.
///
/// The delay before retry `i` (0-based) is
/// `min(initial_delay * multiplier^i, max_delay) + uniform(0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(8000),
            jitter: Duration::from_millis(250),
            max_attempts: 5,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Same policy with jitter disabled.
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: Duration::ZERO,
            ..self
        }
    }

    /// Nominal (jitter-free) delay before retry `attempt`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = (initial_ms * self.multiplier.powi(exponent)).min(max_ms);
        // powi overflows to infinity for large attempts; min() caps it.
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Delay before retry `attempt`, including random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.nominal_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Sum of nominal delays across all retries, ignoring jitter.
    pub fn worst_case_nominal_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| self.nominal_delay(i))
            .sum()
    }
}
