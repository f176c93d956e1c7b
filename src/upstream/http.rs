//! HTTP adapter performing a single upstream attempt.
//!
//! # Responsibilities
//! - Send `POST {base_url}/{path}` with the leased credential as a bearer token
//! - Classify the response into an [`AttemptError`] for the retry executor

use std::time::Duration;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;
use crate::credentials::CredentialLease;
use crate::dispatch::types::AttemptError;
use crate::resilience::timeouts::with_deadline;

/// Longest upstream error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum UpstreamSetupError {
    #[error("invalid upstream base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Map a non-success HTTP status to an attempt failure.
///
/// Returns `None` for 2xx. `retry_after` is the raw `Retry-After` header;
/// only the delay-seconds form is understood.
pub fn classify_status(status: u16, retry_after: Option<&str>, body: &str) -> Option<AttemptError> {
    match status {
        200..=299 => None,
        429 => Some(AttemptError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }),
        500..=599 => Some(AttemptError::Server {
            status,
            message: truncate(body),
        }),
        _ => Some(AttemptError::Other {
            status: Some(status),
            message: truncate(body),
        }),
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

fn classify_transport(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() {
        AttemptError::Timeout
    } else if error.is_connect() || error.is_request() {
        AttemptError::Connection(error.to_string())
    } else {
        AttemptError::other(error.to_string())
    }
}

/// JSON-over-HTTP upstream client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, UpstreamSetupError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout.min(MAX_CONNECT_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamSetupError> {
        let base_url = Url::parse(&config.base_url)?;
        Self::new(base_url, Duration::from_secs(config.request_timeout_secs))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL. A leading `/` is ignored so the
    /// base path is never discarded.
    pub fn endpoint(&self, path: &str) -> Result<Url, AttemptError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AttemptError::other(format!("invalid path '{path}': {e}")))
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Perform one attempt, bounded by the request timeout.
    pub async fn post_json(&self, lease: &CredentialLease, path: &str, body: &Value) -> Result<Value, AttemptError> {
        let url = self.endpoint(path)?;
        with_deadline(self.request_timeout, self.send(lease, url, body)).await
    }

    async fn send(&self, lease: &CredentialLease, url: Url, body: &Value) -> Result<Value, AttemptError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(lease.secret())
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = classify_status(status, retry_after.as_deref(), &text)
                .unwrap_or_else(|| AttemptError::other(format!("unexpected status {status}")));
            tracing::debug!(
                credential = %lease.label(),
                status,
                kind = error.kind(),
                "Upstream attempt failed"
            );
            return Err(error);
        }

        let text = response.text().await.map_err(classify_transport)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AttemptError::other(format!("invalid JSON from upstream: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, None, ""), None);
        assert_eq!(classify_status(204, Some("10"), ""), None);
        assert_eq!(
            classify_status(429, Some(" 30 "), ""),
            Some(AttemptError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            })
        );
        // HTTP-date form is not understood; the pool default applies.
        assert_eq!(
            classify_status(429, Some("Wed, 21 Oct 2015 07:28:00 GMT"), ""),
            Some(AttemptError::RateLimited { retry_after: None })
        );
        assert_eq!(
            classify_status(503, None, "down"),
            Some(AttemptError::Server {
                status: 503,
                message: "down".into()
            })
        );
        let bad_request = classify_status(400, None, "missing prompt").unwrap();
        assert!(!bad_request.is_retryable());
        assert_eq!(
            bad_request,
            AttemptError::Other {
                status: Some(400),
                message: "missing prompt".into()
            }
        );
    }

    #[test]
    fn test_long_error_body_truncated() {
        let body = "x".repeat(2000);
        match classify_status(500, None, &body) {
            Some(AttemptError::Server { message, .. }) => {
                assert_eq!(message.len(), MAX_ERROR_BODY + 3);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let upstream = HttpUpstream::new(Url::parse("http://localhost:8000/api/").unwrap(), Duration::from_secs(5)).unwrap();
        assert_eq!(upstream.endpoint("/v1/images").unwrap().as_str(), "http://localhost:8000/api/v1/images");
        assert_eq!(upstream.endpoint("v1/video").unwrap().as_str(), "http://localhost:8000/api/v1/video");
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config = UpstreamConfig {
            base_url: "not a url".into(),
            request_timeout_secs: 5,
        };
        assert!(matches!(HttpUpstream::from_config(&config), Err(UpstreamSetupError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new(Url::parse(&format!("http://{addr}/")).unwrap(), Duration::from_secs(2)).unwrap();
        let lease = Credential::new("sk-test-secret-1234", None).lease();
        let err = upstream.post_json(&lease, "v1/images", &serde_json::json!({})).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stalled_upstream_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let upstream = HttpUpstream::new(Url::parse(&format!("http://{addr}/")).unwrap(), Duration::from_millis(200)).unwrap();
        let lease = Credential::new("sk-test-secret-1234", None).lease();
        let err = upstream.post_json(&lease, "v1/images", &serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, AttemptError::Timeout);
    }
}
