//! Per-attempt deadlines.
//!
//! The deadline is chosen by the call site. An elapsed deadline becomes a
//! retryable [`AttemptError::Timeout`] and the in-flight future is dropped.

use std::future::Future;
use std::time::Duration;

use crate::dispatch::types::AttemptError;

/// Run one attempt under a deadline.
pub async fn with_deadline<T, Fut>(deadline: Duration, attempt: Fut) -> Result<T, AttemptError>
where
    Fut: Future<Output = Result<T, AttemptError>>,
{
    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(deadline_ms = deadline.as_millis() as u64, "Upstream attempt deadline elapsed");
            Err(AttemptError::Timeout)
        }
    }
}
