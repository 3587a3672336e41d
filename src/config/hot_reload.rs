//! Settings Watcher - Pick Up Feed Flag Edits From Other Processes
//!
//! Periodically hashes the settings file and, when the contents change,
//! asks the `ConfigStore` to re-read it. The store only notifies its
//! listeners when the effective flags differ, so rewrites made by this
//! process through `ConfigStore::set()` pass through silently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::usecases::config_store::ConfigStore;

/// Polls the settings file for external changes.
///
/// Polling, not a filesystem watcher, which has portability issues
/// across Linux/macOS/Docker volumes.
pub struct SettingsWatcher {
    /// Path to the settings file.
    path: PathBuf,
    /// Store to refresh on change.
    store: Arc<ConfigStore>,
    /// Poll period.
    interval: Duration,
    /// Last seen content hash.
    last_hash: Option<u64>,
}

impl SettingsWatcher {
    pub fn new(path: impl Into<PathBuf>, store: Arc<ConfigStore>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            store,
            interval,
            last_hash: None,
        }
    }

    /// Run the watcher loop until shutdown.
    #[instrument(skip(self, shutdown_rx), fields(path = %self.path.display()))]
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Settings watcher started"
        );

        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Settings watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.check().await;
                }
            }
        }
    }

    /// Refresh the store if the file changed since the last check.
    /// Returns whether the store published a change.
    pub async fn check(&mut self) -> bool {
        let new_hash = self.compute_hash().await;
        if new_hash == self.last_hash {
            return false;
        }
        self.last_hash = new_hash;
        debug!("Settings file changed on disk");

        match self.store.refresh() {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "Failed to reload settings, keeping current flags");
                false
            }
        }
    }

    async fn compute_hash(&self) -> Option<u64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let content = tokio::fs::read_to_string(&self.path).await.ok()?;

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}
