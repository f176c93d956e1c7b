//! Idempotency result caching.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::OperationConfig;
use crate::idempotency::token::IdempotencyToken;
use crate::observability::metrics;

/// Default minimum time between inline expiry sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheState<T> {
    entries: HashMap<IdempotencyToken, CacheEntry<T>>,
    last_cleanup: Instant,
}

/// Read-only view of a cache.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub name: String,
    pub enabled: bool,
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
}

/// Maps idempotency tokens to previously produced results for a limited time.
///
/// Bounded: inserting at capacity first evicts the oldest tenth of the
/// entries by creation time.
#[derive(Debug)]
pub struct IdempotencyCache<T> {
    name: String,
    ttl: Duration,
    capacity: usize,
    cleanup_interval: Duration,
    enabled: bool,
    state: Mutex<CacheState<T>>,
}

impl<T: Clone> IdempotencyCache<T> {
    /// Create an enabled cache. A capacity of zero is treated as one.
    pub fn new(name: impl Into<String>, ttl: Duration, capacity: usize) -> Self {
        Self {
            name: name.into(),
            ttl,
            capacity: capacity.max(1),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            enabled: true,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Create the cache for an operation class.
    pub fn from_config(config: &OperationConfig, cleanup_interval: Duration) -> Self {
        Self::new(
            config.name.clone(),
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        )
        .with_cleanup_interval(cleanup_interval)
        .with_enabled(config.cache_enabled)
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// A disabled cache never stores and always misses.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate a raw client token before it can reach the cache.
    pub fn validate(raw: &str) -> Result<IdempotencyToken, crate::dispatch::types::DispatchError> {
        IdempotencyToken::parse(raw)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached result for `token`, if present and not expired.
    ///
    /// An expired entry found here is removed.
    pub fn get(&self, token: &IdempotencyToken) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let mut state = self.lock();

        match state.entries.get(token) {
            None => {
                metrics::record_idempotency_lookup(&self.name, "miss");
                return None;
            }
            Some(entry) if now <= entry.expires_at => {
                tracing::debug!(cache = %self.name, token = %token, "Idempotency cache hit");
                metrics::record_idempotency_lookup(&self.name, "hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        state.entries.remove(token);
        metrics::record_cache_size(&self.name, state.entries.len());
        metrics::record_idempotency_lookup(&self.name, "expired");
        None
    }

    /// Store `value` under `token` with expiry `now + ttl`.
    ///
    /// Runs the periodic expiry sweep and capacity eviction first.
    pub fn set(&self, token: IdempotencyToken, value: T) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let mut state = self.lock();

        if now.saturating_duration_since(state.last_cleanup) >= self.cleanup_interval {
            let removed = remove_expired(&mut state.entries, now);
            state.last_cleanup = now;
            if removed > 0 {
                tracing::debug!(cache = %self.name, removed, "Swept expired idempotency entries");
            }
        }

        if state.entries.len() >= self.capacity && !state.entries.contains_key(&token) {
            let evicted = evict_oldest(&mut state.entries, (self.capacity / 10).max(1));
            tracing::debug!(cache = %self.name, evicted, capacity = self.capacity, "Idempotency cache full, evicted oldest entries");
        }

        state.entries.insert(
            token,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        metrics::record_cache_size(&self.name, state.entries.len());
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let removed = remove_expired(&mut state.entries, now);
        state.last_cleanup = now;
        metrics::record_cache_size(&self.name, state.entries.len());
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
        metrics::record_cache_size(&self.name, 0);
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            enabled: self.enabled,
            entries: self.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

fn remove_expired<T>(entries: &mut HashMap<IdempotencyToken, CacheEntry<T>>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now <= entry.expires_at);
    before - entries.len()
}

fn evict_oldest<T>(entries: &mut HashMap<IdempotencyToken, CacheEntry<T>>, count: usize) -> usize {
    let mut by_age: Vec<(Instant, IdempotencyToken)> = entries
        .iter()
        .map(|(token, entry)| (entry.created_at, token.clone()))
        .collect();
    by_age.sort();
    let mut evicted = 0;
    for (_, token) in by_age.into_iter().take(count) {
        entries.remove(&token);
        evicted += 1;
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> IdempotencyToken {
        IdempotencyToken::generate()
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_set_and_expiry() {
        let cache = IdempotencyCache::new("image", Duration::from_secs(600), 100);
        let t = token();

        assert_eq!(cache.get(&t), None);
        cache.set(t.clone(), "result".to_string());
        assert_eq!(cache.get(&t).as_deref(), Some("result"));

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(cache.get(&t).as_deref(), Some("result"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&t), None);
        assert!(cache.is_empty(), "expired entry removed on access");
    }

    #[test]
    fn test_validate() {
        assert!(IdempotencyCache::<String>::validate("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(IdempotencyCache::<String>::validate("not-a-uuid").is_err());
        assert!(IdempotencyCache::<String>::validate("").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_tenth() {
        let cache = IdempotencyCache::new("image", Duration::from_secs(3600), 20);
        let tokens: Vec<IdempotencyToken> = (0..20).map(|_| token()).collect();
        for (i, t) in tokens.iter().enumerate() {
            cache.set(t.clone(), i);
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len(), 20);

        let newest = token();
        cache.set(newest.clone(), 99);
        assert_eq!(cache.len(), 19);
        assert_eq!(cache.get(&tokens[0]), None);
        assert_eq!(cache.get(&tokens[1]), None);
        assert_eq!(cache.get(&tokens[2]), Some(2));
        assert_eq!(cache.get(&newest), Some(99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = IdempotencyCache::new("image", Duration::from_secs(3600), 2);
        let a = token();
        let b = token();
        cache.set(a.clone(), 1);
        cache.set(b.clone(), 2);
        cache.set(a.clone(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a), Some(3));
        assert_eq!(cache.get(&b), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_sweep_is_gated_by_interval() {
        let cache = IdempotencyCache::new("image", Duration::from_secs(40), 100)
            .with_cleanup_interval(Duration::from_secs(60));
        let stale = token();
        cache.set(stale.clone(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set(token(), 2);
        assert_eq!(cache.len(), 2, "sweep not due yet");

        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set(token(), 3);
        assert_eq!(cache.len(), 2, "stale entry swept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_sweep_and_clear() {
        let cache = IdempotencyCache::new("video", Duration::from_secs(5), 100);
        cache.set(token(), 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.set(token(), 2);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache() {
        let cache = IdempotencyCache::new("image", Duration::from_secs(60), 10).with_enabled(false);
        let t = token();
        cache.set(t.clone(), 1);
        assert_eq!(cache.get(&t), None);
        let stats = cache.stats();
        assert!(!stats.enabled);
        assert_eq!(stats.entries, 0);
    }
}
