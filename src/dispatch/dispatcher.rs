//! Dispatcher: the composition root of the dispatch layer.
//!
//! # Responsibilities
//! - Validate the idempotency token and answer from the cache when possible
//! - Run the upstream call through the retry executor and circuit breaker
//! - Select a credential for every attempt and report its outcome to the pool
//! - Cache fresh results under the caller's token
//! - Swap in a rebuilt credential pool on reconfiguration

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::Instrument;

use crate::config::{CredentialConfig, DispatchConfig};
use crate::credentials::{Credential, CredentialLease, CredentialPool, PoolError, PoolStats};
use crate::dispatch::types::{AttemptError, DispatchError, DispatchResult, Outcome};
use crate::idempotency::{CacheStats, IdempotencyCache, IdempotencyToken};
use crate::resilience::{BreakerRegistry, BreakerStats, RetryExecutor, RetryPolicy};

/// An operation class: the service it calls and its idempotency cache.
#[derive(Debug)]
struct Operation<T> {
    service: String,
    cache: IdempotencyCache<T>,
}

/// Aggregate snapshot of every component.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub pool: PoolStats,
    pub breakers: Vec<BreakerStats>,
    pub caches: Vec<CacheStats>,
}

/// Routes logical requests through the cache, pool, retry executor and breakers.
///
/// `T` is the opaque result payload; it is cloned into and out of the
/// idempotency caches.
#[derive(Debug)]
pub struct Dispatcher<T> {
    pool: ArcSwap<CredentialPool>,
    executor: RetryExecutor,
    policy: RetryPolicy,
    operations: BTreeMap<String, Operation<T>>,
}

impl<T: Clone> Dispatcher<T> {
    /// Create a dispatcher with no operation classes.
    pub fn new(pool: CredentialPool, breakers: BreakerRegistry, policy: RetryPolicy) -> Self {
        Self {
            pool: ArcSwap::from_pointee(pool),
            executor: RetryExecutor::new(Arc::new(breakers)),
            policy,
            operations: BTreeMap::new(),
        }
    }

    /// Register an operation class calling `service`, with its own cache.
    pub fn with_operation(mut self, name: impl Into<String>, service: impl Into<String>, cache: IdempotencyCache<T>) -> Self {
        self.operations.insert(
            name.into(),
            Operation {
                service: service.into(),
                cache,
            },
        );
        self
    }

    /// Build every component from a validated configuration.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, PoolError> {
        let pool = CredentialPool::from_config(&config.credentials, &config.pool)?;
        let breakers = BreakerRegistry::new(&config.breakers);
        let sweep_interval = Duration::from_secs(config.maintenance.cache_sweep_interval_secs);

        let dispatcher = config.operations.iter().fold(
            Self::new(pool, breakers, RetryPolicy::from(&config.retries)),
            |dispatcher, op| {
                dispatcher.with_operation(
                    op.name.clone(),
                    op.service.clone(),
                    IdempotencyCache::from_config(op, sweep_interval),
                )
            },
        );

        tracing::info!(
            operations = ?dispatcher.operations.keys().collect::<Vec<_>>(),
            max_attempts = dispatcher.policy.max_attempts,
            "Dispatcher initialized"
        );
        Ok(dispatcher)
    }

    /// The current credential pool.
    pub fn pool(&self) -> Arc<CredentialPool> {
        self.pool.load_full()
    }

    /// Replace the credential pool. In-flight attempts finish on the old one.
    pub fn replace_pool(&self, pool: CredentialPool) {
        self.pool.store(Arc::new(pool));
    }

    /// Rebuild the pool from a new credential list and swap it in.
    ///
    /// On error the current pool stays in place.
    pub fn rebuild_pool(&self, credentials: &[CredentialConfig]) -> Result<(), PoolError> {
        let fresh = credentials
            .iter()
            .map(|c| Credential::new(c.secret.clone(), c.label.clone()))
            .collect();
        let rebuilt = self.pool.load().rebuild(fresh)?;
        let size = rebuilt.len();
        self.replace_pool(rebuilt);
        tracing::info!(credentials = size, "Credential pool rebuilt");
        Ok(())
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.executor.breakers()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Names of the configured operation classes.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// The idempotency cache of an operation class.
    pub fn cache(&self, operation: &str) -> Option<&IdempotencyCache<T>> {
        self.operations.get(operation).map(|op| &op.cache)
    }

    /// Dispatch one logical request.
    ///
    /// `attempt` performs a single upstream call with the leased credential
    /// and classifies its failure. It is invoked once per attempt, each time
    /// with a freshly selected credential.
    pub async fn dispatch<F, Fut>(
        &self,
        operation: &str,
        idempotency_token: Option<&str>,
        attempt: F,
    ) -> DispatchResult<Outcome<T>>
    where
        F: Fn(CredentialLease) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let token = idempotency_token.map(IdempotencyToken::parse).transpose()?;
        let op = self
            .operations
            .get(operation)
            .ok_or_else(|| DispatchError::UnknownOperation(operation.to_string()))?;

        if let Some(token) = &token {
            if let Some(cached) = op.cache.get(token) {
                tracing::info!(operation = %operation, token = %token, "Returning cached result");
                return Ok(Outcome::Cached(cached));
            }
        }

        let span = tracing::info_span!("dispatch", operation = %operation, service = %op.service);
        let pools = &self.pool;
        let value = self
            .executor
            .run(&op.service, &self.policy, |attempt_index| {
                let lease = pools.load().select();
                tracing::debug!(attempt = attempt_index, credential = %lease.label(), "Attempting upstream call");
                let call = attempt(lease.clone());
                async move {
                    let outcome = call.await;
                    // Report to whichever pool is current; the lease is keyed by secret.
                    match &outcome {
                        Err(AttemptError::RateLimited { retry_after }) => {
                            pools.load().mark_rate_limited(&lease, *retry_after)
                        }
                        _ => pools.load().mark_success(&lease),
                    }
                    outcome
                }
            })
            .instrument(span)
            .await?;

        if let Some(token) = token {
            op.cache.set(token, value.clone());
        }
        Ok(Outcome::Fresh(value))
    }

    /// Sweep expired entries from every cache. Returns how many were removed.
    pub fn sweep_caches(&self) -> usize {
        self.operations.values().map(|op| op.cache.sweep()).sum()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            pool: self.pool.load().stats(),
            breakers: self.breakers().stats(),
            caches: self.operations.values().map(|op| op.cache.stats()).collect(),
        }
    }
}
