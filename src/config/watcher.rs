//! Credential hot reload.
//!
//! Only the credential list is applied at runtime. The watcher reloads and
//! validates the file on change, diffs it against the last version it saw,
//! and emits a [`CredentialReload`] when the credentials differ. Edits to any
//! other section are reported and ignored until restart.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{CredentialConfig, DispatchConfig};

/// A new credential list to rebuild the pool from.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialReload {
    pub credentials: Vec<CredentialConfig>,
}

/// Sections that differ between two configs and need a restart to apply.
pub fn restart_required_sections(old: &DispatchConfig, new: &DispatchConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.credentials_env != new.credentials_env {
        changed.push("credentials_env");
    }
    if old.pool != new.pool {
        changed.push("pool");
    }
    if old.retries != new.retries {
        changed.push("retries");
    }
    if old.breakers != new.breakers {
        changed.push("breakers");
    }
    if old.operations != new.operations {
        changed.push("operations");
    }
    if old.upstream != new.upstream {
        changed.push("upstream");
    }
    if old.maintenance != new.maintenance {
        changed.push("maintenance");
    }
    if old.observability != new.observability {
        changed.push("observability");
    }
    changed
}

/// Remembers the last config seen and turns a fresh one into a reload, if any.
#[derive(Debug)]
pub struct ReloadTracker {
    current: DispatchConfig,
}

impl ReloadTracker {
    pub fn new(current: DispatchConfig) -> Self {
        Self { current }
    }

    /// Compare `next` with the last config seen and remember it.
    ///
    /// Returns a reload only when the credential list changed.
    pub fn observe(&mut self, next: DispatchConfig) -> Option<CredentialReload> {
        let ignored = restart_required_sections(&self.current, &next);
        if !ignored.is_empty() {
            tracing::warn!(
                sections = ?ignored,
                "Config sections changed that only apply on restart; ignoring them"
            );
        }

        let reload = (next.credentials != self.current.credentials).then(|| CredentialReload {
            credentials: next.credentials.clone(),
        });
        if reload.is_none() && ignored.is_empty() {
            tracing::debug!("Config file touched without changes");
        }
        self.current = next;
        reload
    }
}

/// Watches the configuration file and emits credential reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    tracker: ReloadTracker,
    reload_tx: mpsc::UnboundedSender<CredentialReload>,
}

impl ConfigWatcher {
    /// `loaded` is the config the process is currently running with.
    pub fn new(path: &Path, loaded: DispatchConfig) -> (Self, mpsc::UnboundedReceiver<CredentialReload>) {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                tracker: ReloadTracker::new(loaded),
                reload_tx,
            },
            reload_rx,
        )
    }

    /// Start watching. Keep the returned watcher alive to keep watching.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut tracker,
            reload_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => match load_config(&path) {
                    Ok(next) => {
                        if let Some(reload) = tracker.observe(next) {
                            tracing::info!(credentials = reload.credentials.len(), "Credential list changed");
                            let _ = reload_tx.send(reload);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current credentials");
                    }
                },
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watched, "Credential watcher started");
        Ok(watcher)
    }
}
