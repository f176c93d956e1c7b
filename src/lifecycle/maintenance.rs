//! Periodic maintenance.
//!
//! # Responsibilities
//! - Sweep expired entries out of every idempotency cache
//! - Log a summary of pool, breaker and cache state

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::MaintenanceConfig;
use crate::dispatch::Dispatcher;
use crate::observability::metrics;

pub struct MaintenanceTask<T> {
    dispatcher: Arc<Dispatcher<T>>,
    sweep_interval: Duration,
    stats_interval: Duration,
}

impl<T: Clone> MaintenanceTask<T> {
    pub fn new(dispatcher: Arc<Dispatcher<T>>, config: &MaintenanceConfig) -> Self {
        Self {
            dispatcher,
            sweep_interval: Duration::from_secs(config.cache_sweep_interval_secs),
            stats_interval: Duration::from_secs(config.stats_interval_secs),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            stats_interval_secs = self.stats_interval.as_secs(),
            "Maintenance task starting"
        );

        let mut sweep_ticker = time::interval(self.sweep_interval);
        let mut stats_ticker = time::interval(self.stats_interval);
        sweep_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        stats_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        sweep_ticker.tick().await;
        stats_ticker.tick().await;

        loop {
            tokio::select! {
                _ = sweep_ticker.tick() => {
                    self.sweep();
                }
                _ = stats_ticker.tick() => {
                    self.log_stats();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn sweep(&self) -> usize {
        let removed = self.dispatcher.sweep_caches();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired idempotency entries");
        }
        removed
    }

    fn log_stats(&self) {
        let stats = self.dispatcher.stats();
        let open_circuits: Vec<&str> = stats
            .breakers
            .iter()
            .filter(|b| b.open)
            .map(|b| b.name.as_str())
            .collect();

        for cache in &stats.caches {
            metrics::record_cache_size(&cache.name, cache.entries);
        }

        tracing::info!(
            credentials = stats.pool.total_keys,
            available = stats.pool.available_keys,
            requests = stats.pool.total_requests,
            rate_limits = stats.pool.total_rate_limits,
            open_circuits = ?open_circuits,
            cached = stats.caches.iter().map(|c| c.entries).sum::<usize>(),
            "Dispatch stats"
        );
    }
}
