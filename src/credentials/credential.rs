//! Credential abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream access token
//! - Track usage (request count, last use)
//! - Track rate-limit cooldown and consecutive rate-limit signals

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A single upstream credential and its usage state.
///
/// Only ever mutated while the owning pool's lock is held.
#[derive(Clone)]
pub struct Credential {
    /// The opaque secret sent upstream.
    pub(crate) secret: Arc<str>,
    /// Human-readable label, safe to log.
    pub label: String,
    /// Number of times this credential was handed out.
    pub request_count: u64,
    /// When this credential was last handed out.
    pub last_used: Option<Instant>,
    /// Excluded from normal selection until this instant.
    pub unavailable_until: Option<Instant>,
    /// Rate-limit signals since the last non-rate-limited outcome.
    pub consecutive_rate_limits: u32,
}

impl Credential {
    /// Create a new credential. Without a label, a masked form of the secret is used.
    pub fn new(secret: impl Into<String>, label: Option<String>) -> Self {
        let secret: String = secret.into();
        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| mask_secret(&secret));
        Self {
            secret: Arc::from(secret),
            label,
            request_count: 0,
            last_used: None,
            unavailable_until: None,
            consecutive_rate_limits: 0,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Return true if the credential is outside any cooldown at `now`.
    pub fn is_available(&self, now: Instant) -> bool {
        self.unavailable_until.map_or(true, |until| until <= now)
    }

    /// Time left in the cooldown, zero when available.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        self.unavailable_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub(crate) fn record_use(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_used = Some(now);
    }

    /// Push the cooldown forward. An existing later deadline is kept.
    pub(crate) fn extend_cooldown(&mut self, now: Instant, cooldown: Duration) {
        let until = now + cooldown;
        self.unavailable_until = Some(match self.unavailable_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        self.consecutive_rate_limits += 1;
    }

    pub(crate) fn lease(&self) -> CredentialLease {
        CredentialLease {
            secret: self.secret.clone(),
            label: self.label.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("request_count", &self.request_count)
            .field("unavailable_until", &self.unavailable_until)
            .field("consecutive_rate_limits", &self.consecutive_rate_limits)
            .finish()
    }
}

/// The credential handed to one upstream attempt.
///
/// Cheap to clone. The pool is identified on report by the secret, so a
/// lease stays valid across a pool rebuild that keeps the same secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialLease {
    secret: Arc<str>,
    label: String,
}

impl CredentialLease {
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("label", &self.label)
            .finish()
    }
}

/// Mask a secret for display: first four and last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len().max(3));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-a…mnop");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret(""), "***");
    }

    #[test]
    fn test_label_defaults_to_mask() {
        let c = Credential::new("sk-1234567890abcdef", None);
        assert_eq!(c.label, "sk-1…cdef");

        let c = Credential::new("sk-1234567890abcdef", Some("primary".into()));
        assert_eq!(c.label, "primary");
    }

    #[test]
    fn test_debug_hides_secret() {
        let c = Credential::new("sk-topsecretvalue", Some("main".into()));
        let printed = format!("{:?} {:?}", c, c.lease());
        assert!(!printed.contains("topsecret"));
        assert!(printed.contains("main"));
    }

    #[test]
    fn test_cooldown_never_shortens() {
        let now = Instant::now();
        let mut c = Credential::new("sk-aaaaaaaaaaaa", None);
        assert!(c.is_available(now));

        c.extend_cooldown(now, Duration::from_secs(65));
        c.extend_cooldown(now, Duration::from_secs(5));
        assert_eq!(c.unavailable_until, Some(now + Duration::from_secs(65)));
        assert_eq!(c.consecutive_rate_limits, 2);
        assert!(!c.is_available(now + Duration::from_secs(64)));
        assert!(c.is_available(now + Duration::from_secs(65)));
        assert_eq!(c.cooldown_remaining(now + Duration::from_secs(60)), Duration::from_secs(5));
    }
}
