//! Credential pool management.
//!
//! # Responsibilities
//! - Hold the ordered set of credentials for one upstream API
//! - Round-robin selection that skips credentials in cooldown
//! - Degraded-mode fallback when every credential is cooling down
//! - Administrative add/remove and rebuild from a new credential list

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{CredentialConfig, PoolConfig};
use crate::credentials::credential::{Credential, CredentialLease};
use crate::observability::metrics;

/// Smallest cooldown applied on a rate-limit signal.
const MIN_COOLDOWN: Duration = Duration::from_secs(1);

/// Errors from pool construction and administration.
///
/// Selection and outcome reporting never fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("credential pool must contain at least one credential")]
    Empty,

    #[error("credential '{0}' is already in the pool")]
    Duplicate(String),

    #[error("credential '{0}' is not in the pool")]
    NotFound(String),

    #[error("refusing to remove the last credential")]
    LastCredential,
}

#[derive(Debug)]
struct PoolState {
    credentials: Vec<Credential>,
    /// Index where the next scan starts.
    next: usize,
    total_requests: u64,
    total_rate_limits: u64,
}

/// A pool of interchangeable credentials with cooldown-aware rotation.
#[derive(Debug)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
    default_cooldown: Duration,
}

/// Per-credential view in a pool snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CredentialStats {
    pub label: String,
    pub available: bool,
    pub request_count: u64,
    pub cooldown_remaining_secs: f64,
    pub consecutive_rate_limits: u32,
}

/// Read-only aggregate view of a pool.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub total_keys: usize,
    pub available_keys: usize,
    pub total_requests: u64,
    pub total_rate_limits: u64,
    pub keys: Vec<CredentialStats>,
}

impl CredentialPool {
    /// Create a pool from credentials in rotation order.
    pub fn new(credentials: Vec<Credential>, default_cooldown: Duration) -> Result<Self, PoolError> {
        if credentials.is_empty() {
            return Err(PoolError::Empty);
        }
        let mut seen = HashSet::new();
        for credential in &credentials {
            if !seen.insert(credential.secret.clone()) {
                return Err(PoolError::Duplicate(credential.label.clone()));
            }
        }

        tracing::info!(
            credentials = credentials.len(),
            default_cooldown_secs = default_cooldown.as_secs(),
            "Credential pool created"
        );

        Ok(Self {
            state: Mutex::new(PoolState {
                credentials,
                next: 0,
                total_requests: 0,
                total_rate_limits: 0,
            }),
            default_cooldown,
        })
    }

    /// Create a pool from configuration entries.
    pub fn from_config(entries: &[CredentialConfig], config: &PoolConfig) -> Result<Self, PoolError> {
        let credentials = entries
            .iter()
            .map(|e| Credential::new(e.secret.clone(), e.label.clone()))
            .collect();
        Self::new(credentials, Duration::from_secs(config.rate_limit_cooldown_secs))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cooldown applied when the upstream gives no reset hint.
    pub fn default_cooldown(&self) -> Duration {
        self.default_cooldown
    }

    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    /// Always false; a pool is never empty.
    pub fn is_empty(&self) -> bool {
        self.lock().credentials.is_empty()
    }

    /// Labels in rotation order.
    pub fn labels(&self) -> Vec<String> {
        self.lock().credentials.iter().map(|c| c.label.clone()).collect()
    }

    /// Select the next credential. Never fails and never blocks on I/O.
    ///
    /// Scans forward from the cursor and returns the first credential out of
    /// cooldown, moving the cursor past it. When every credential is cooling
    /// down, returns the one closest to becoming available and leaves the
    /// cursor where it is.
    pub fn select(&self) -> CredentialLease {
        let now = Instant::now();
        let mut state = self.lock();
        let len = state.credentials.len();
        let start = state.next % len;

        for i in 0..len {
            let index = (start + i) % len;
            if state.credentials[index].is_available(now) {
                state.next = (index + 1) % len;
                state.total_requests += 1;
                let credential = &mut state.credentials[index];
                credential.record_use(now);
                metrics::record_credential_selected(&credential.label, false);
                return credential.lease();
            }
        }

        // Degraded mode: least remaining cooldown, first one on ties.
        let index = state
            .credentials
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.cooldown_remaining(now))
            .map(|(i, _)| i)
            .unwrap_or(0);
        state.total_requests += 1;
        let credential = &mut state.credentials[index];
        credential.record_use(now);

        tracing::warn!(
            credential = %credential.label,
            cooldown_remaining_ms = credential.cooldown_remaining(now).as_millis() as u64,
            pool_size = len,
            "All credentials cooling down, using least-limited credential"
        );
        metrics::record_credential_selected(&credential.label, true);
        credential.lease()
    }

    /// Put a credential into cooldown after an upstream rate-limit signal.
    ///
    /// `cooldown` is the upstream reset hint when one was given; otherwise the
    /// pool default applies. An existing longer cooldown is kept.
    pub fn mark_rate_limited(&self, lease: &CredentialLease, cooldown: Option<Duration>) {
        let cooldown = cooldown.unwrap_or(self.default_cooldown).max(MIN_COOLDOWN);
        let now = Instant::now();
        let mut state = self.lock();

        let Some(index) = state.credentials.iter().position(|c| c.secret() == lease.secret()) else {
            tracing::debug!(credential = %lease.label(), "Rate limit reported for credential no longer in pool");
            return;
        };
        state.total_rate_limits += 1;
        let credential = &mut state.credentials[index];
        credential.extend_cooldown(now, cooldown);

        tracing::warn!(
            credential = %credential.label,
            cooldown_secs = cooldown.as_secs(),
            consecutive = credential.consecutive_rate_limits,
            "Credential rate limited, cooling down"
        );
        metrics::record_credential_rate_limited(&credential.label);
    }

    /// Reset the consecutive rate-limit counter. The cooldown is untouched.
    pub fn mark_success(&self, lease: &CredentialLease) {
        let mut state = self.lock();
        if let Some(credential) = state
            .credentials
            .iter_mut()
            .find(|c| c.secret() == lease.secret())
        {
            credential.consecutive_rate_limits = 0;
        }
    }

    /// Snapshot for observability. Does not mutate state.
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let state = self.lock();
        let keys: Vec<CredentialStats> = state
            .credentials
            .iter()
            .map(|c| CredentialStats {
                label: c.label.clone(),
                available: c.is_available(now),
                request_count: c.request_count,
                cooldown_remaining_secs: c.cooldown_remaining(now).as_secs_f64(),
                consecutive_rate_limits: c.consecutive_rate_limits,
            })
            .collect();

        PoolStats {
            total_keys: keys.len(),
            available_keys: keys.iter().filter(|k| k.available).count(),
            total_requests: state.total_requests,
            total_rate_limits: state.total_rate_limits,
            keys,
        }
    }

    /// Append a credential to the end of the rotation.
    pub fn add(&self, secret: impl Into<String>, label: Option<String>) -> Result<(), PoolError> {
        let credential = Credential::new(secret, label);
        let mut state = self.lock();
        if state.credentials.iter().any(|c| c.secret == credential.secret) {
            return Err(PoolError::Duplicate(credential.label));
        }
        tracing::info!(credential = %credential.label, "Credential added to pool");
        state.credentials.push(credential);
        Ok(())
    }

    /// Remove a credential by secret. Rejected if it is the last one.
    pub fn remove(&self, secret: &str) -> Result<(), PoolError> {
        let mut state = self.lock();
        let index = state
            .credentials
            .iter()
            .position(|c| c.secret() == secret)
            .ok_or_else(|| PoolError::NotFound(crate::credentials::mask_secret(secret)))?;
        if state.credentials.len() == 1 {
            return Err(PoolError::LastCredential);
        }

        let removed = state.credentials.remove(index);
        if index < state.next {
            state.next -= 1;
        }
        state.next %= state.credentials.len();
        tracing::info!(credential = %removed.label, "Credential removed from pool");
        Ok(())
    }

    /// Build a replacement pool from a new credential list.
    ///
    /// Credentials whose secret is present in both lists keep their usage
    /// counters and cooldown; the rotation cursor starts over.
    pub fn rebuild(&self, credentials: Vec<Credential>) -> Result<CredentialPool, PoolError> {
        let (carried, total_requests, total_rate_limits) = {
            let state = self.lock();
            let carried: HashMap<_, _> = state
                .credentials
                .iter()
                .map(|c| (c.secret.clone(), c.clone()))
                .collect();
            (carried, state.total_requests, state.total_rate_limits)
        };

        let merged = credentials
            .into_iter()
            .map(|mut fresh| {
                if let Some(old) = carried.get(&fresh.secret) {
                    fresh.request_count = old.request_count;
                    fresh.last_used = old.last_used;
                    fresh.unavailable_until = old.unavailable_until;
                    fresh.consecutive_rate_limits = old.consecutive_rate_limits;
                }
                fresh
            })
            .collect();

        let pool = CredentialPool::new(merged, self.default_cooldown)?;
        {
            let mut state = pool.lock();
            state.total_requests = total_requests;
            state.total_rate_limits = total_rate_limits;
        }
        Ok(pool)
    }
}
