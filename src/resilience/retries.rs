//! Retry logic.
//!
//! # Responsibilities
//! - Consult the service's circuit breaker before every attempt
//! - Classify each attempt outcome as success, retryable or terminal
//! - Sleep between attempts with exponential backoff + jitter
//! - Report every attempt outcome to the circuit breaker
//!
//! # State Machine
//! ```text
//! Attempting(n) → Success
//! Attempting(n) → RetryableFailure → sleep → Attempting(n + 1)
//! Attempting(n) → NonRetryableFailure → Failed
//! Attempting(n) → AttemptsExhausted → Failed
//! ```
//!
//! The sleep holds no shared lock; only the calling task is suspended.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::types::{AttemptError, DispatchError, DispatchResult};
use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::circuit_breaker::BreakerRegistry;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then attempt again.
    RetryAfter(Duration),
    /// The error is not retryable; surface it unchanged.
    GiveUp,
    /// The error was retryable but no attempts remain.
    Exhausted,
}

/// Decide the next step after attempt `attempt` (0-based) failed with `error`.
pub fn decide(policy: &RetryPolicy, attempt: u32, error: &AttemptError) -> RetryDecision {
    if !error.is_retryable() {
        RetryDecision::GiveUp
    } else if attempt + 1 >= policy.max_attempts.max(1) {
        RetryDecision::Exhausted
    } else {
        RetryDecision::RetryAfter(policy.delay(attempt))
    }
}

/// Runs one logical operation with retries under a named circuit breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breakers: Arc<BreakerRegistry>,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run `operation` until it succeeds, fails terminally or runs out of attempts.
    ///
    /// Delays fall only between attempts: `max_attempts` attempts sleep at
    /// most `max_attempts - 1` times, and nothing is slept after the last
    /// failure. With the defaults that is 1, 2, 4 and 8 s plus jitter.
    ///
    /// The operation receives the 0-based attempt index. An open circuit
    /// fails immediately with [`DispatchError::CircuitOpen`] without calling
    /// the operation or consuming an attempt.
    pub async fn run<T, F, Fut>(
        &self,
        service: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> DispatchResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let breaker = self.breakers.get(service);
        let mut attempt: u32 = 0;

        loop {
            if breaker.is_open() {
                tracing::warn!(service = %service, attempt, "Circuit open, failing fast");
                metrics::record_attempt(service, "circuit_open");
                return Err(DispatchError::CircuitOpen {
                    service: service.to_string(),
                });
            }

            let error = match operation(attempt).await {
                Ok(value) => {
                    breaker.record_success();
                    metrics::record_attempt(service, "success");
                    if attempt > 0 {
                        tracing::info!(service = %service, attempts = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            breaker.record_failure();
            metrics::record_attempt(service, error.kind());

            match decide(policy, attempt, &error) {
                RetryDecision::GiveUp => {
                    tracing::debug!(service = %service, attempt, error = %error, "Non-retryable upstream failure");
                    return Err(DispatchError::Upstream(error));
                }
                RetryDecision::Exhausted => {
                    tracing::error!(
                        service = %service,
                        attempts = attempt + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(DispatchError::ExhaustedRetries {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::info!(
                        service = %service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying upstream call"
                    );
                    metrics::record_retry(service);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, BreakerPolicy};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn executor(threshold: u32) -> RetryExecutor {
        let config = BreakerConfig {
            default: BreakerPolicy {
                failure_threshold: threshold,
                reset_timeout_secs: 30,
            },
            services: Default::default(),
        };
        RetryExecutor::new(Arc::new(BreakerRegistry::new(&config)))
    }

    fn deterministic() -> RetryPolicy {
        RetryPolicy::default().without_jitter()
    }

    #[test]
    fn test_decide() {
        let policy = deterministic();
        assert_eq!(
            decide(&policy, 0, &AttemptError::Timeout),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(
            decide(&policy, 3, &AttemptError::RateLimited { retry_after: None }),
            RetryDecision::RetryAfter(Duration::from_millis(8000))
        );
        assert_eq!(decide(&policy, 4, &AttemptError::Timeout), RetryDecision::Exhausted);
        assert_eq!(decide(&policy, 0, &AttemptError::other("bad")), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_with_backoff_schedule() {
        let exec = executor(100);
        let calls = Mutex::new(Vec::new());
        let started = Instant::now();

        let result: DispatchResult<()> = exec
            .run("image", &deterministic(), |_| {
                calls.lock().unwrap().push(Instant::now());
                async {
                    Err(AttemptError::Server {
                        status: 503,
                        message: "overloaded".into(),
                    })
                }
            })
            .await;

        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<u128> = calls.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, [1000, 2000, 4000, 8000]);
        // No delay after the final failure.
        assert_eq!(started.elapsed(), Duration::from_millis(15_000));

        match result {
            Err(DispatchError::ExhaustedRetries { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last.kind(), "server_error");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returned_unchanged() {
        let exec = executor(100);
        let start = Instant::now();
        let mut calls = 0;
        let original = AttemptError::Other {
            status: Some(400),
            message: "malformed".into(),
        };

        let result: DispatchResult<()> = exec
            .run("image", &deterministic(), |_| {
                calls += 1;
                let err = original.clone();
                async move { Err(err) }
            })
            .await;

        assert_eq!(calls, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        match result {
            Err(DispatchError::Upstream(err)) => assert_eq!(err, original),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(exec.breakers().get("image").consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let exec = executor(100);
        let result = exec
            .run("image", &deterministic(), |attempt| async move {
                if attempt < 2 {
                    Err(AttemptError::Timeout)
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(exec.breakers().get("image").consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opening_mid_retry_stops_attempts() {
        let exec = executor(2);
        let mut calls = 0;
        let result: DispatchResult<()> = exec
            .run("video", &deterministic(), |_| {
                calls += 1;
                async { Err(AttemptError::Connection("reset by peer".into())) }
            })
            .await;

        assert_eq!(calls, 2);
        assert!(matches!(result, Err(DispatchError::CircuitOpen { ref service }) if service == "video"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_operation() {
        let exec = executor(1);
        exec.breakers().get("video").record_failure();

        let mut calls = 0;
        let result: DispatchResult<()> = exec
            .run("video", &deterministic(), |_| {
                calls += 1;
                async { Ok(()) }
            })
            .await;
        assert_eq!(calls, 0);
        assert!(result.unwrap_err().is_service_unavailable());

        // Another service is unaffected.
        let ok = exec.run("image", &deterministic(), |_| async { Ok::<_, AttemptError>(1) }).await;
        assert_eq!(ok.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let exec = executor(100);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..deterministic()
        };
        let result: DispatchResult<()> = exec
            .run("image", &policy, |_| async { Err(AttemptError::Timeout) })
            .await;
        assert!(matches!(result, Err(DispatchError::ExhaustedRetries { attempts: 1, .. })));
    }
}
