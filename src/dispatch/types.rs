//! Outcome classification and error definitions.

use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single upstream attempt.
///
/// The transport adapter decides which variant applies; the dispatch layer
/// only cares whether it is a rate limit and whether it is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Upstream signalled a rate limit (HTTP 429 or equivalent).
    #[error("rate limited by upstream")]
    RateLimited {
        /// Reset hint from the upstream response, if it sent one.
        retry_after: Option<Duration>,
    },

    /// Upstream returned a server-side error (5xx).
    #[error("upstream server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The attempt did not complete before its deadline.
    #[error("upstream attempt timed out")]
    Timeout,

    /// Connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other failure: bad request, auth failure, not found, decode error.
    #[error("upstream rejected request: {message}")]
    Other {
        status: Option<u16>,
        message: String,
    },
}

impl AttemptError {
    /// Shorthand for a non-retryable failure without a status code.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            status: None,
            message: message.into(),
        }
    }

    /// Whether re-attempting the same call is expected to eventually succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Other { .. })
    }

    /// Whether this failure is a credential-level rate limit.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection",
            Self::Other { .. } => "other",
        }
    }
}

/// Caller-visible dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The named service's circuit is open; the call was not attempted.
    #[error("service '{service}' temporarily unavailable (circuit open)")]
    CircuitOpen { service: String },

    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: AttemptError,
    },

    /// A non-retryable upstream failure, returned unchanged.
    #[error(transparent)]
    Upstream(AttemptError),

    /// The idempotency token is not a UUID-v4 string.
    #[error("invalid idempotency token")]
    InvalidIdempotencyToken,

    /// No operation class with this name is configured.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
}

impl DispatchError {
    /// Whether the caller should answer "service temporarily unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::ExhaustedRetries { .. })
    }

    /// Whether the caller's own request was at fault.
    ///
    /// Agrees with [`status_code`](Self::status_code): true exactly when it is 4xx.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// HTTP status an outer surface should map this error to.
    ///
    /// Upstream 4xx are passed through, except 401/403/407: those reject the
    /// pool's credential, not the caller, and become 502.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::CircuitOpen { .. } | Self::ExhaustedRetries { .. } => 503,
            Self::InvalidIdempotencyToken => 400,
            Self::UnknownOperation(_) => 404,
            Self::Upstream(AttemptError::Other {
                status: Some(status @ 400..=499),
                ..
            }) if !matches!(status, 401 | 403 | 407) => *status,
            Self::Upstream(_) => 502,
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// A dispatched result, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Served from the idempotency cache without calling upstream.
    Cached(T),
    /// Produced by a fresh upstream call.
    Fresh(T),
}

impl<T> Outcome<T> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Cached(value) | Self::Fresh(value) => value,
        }
    }
}
