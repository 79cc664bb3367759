use anyhow::{Context, Result};
use qbot_core::{Run, RunSummary, StatusStore, TrainingConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Persists the run record for pollers and keeps the run lock alive.
///
/// Every write replaces the whole record and refreshes its expiry. While the
/// run is running, the lock held by `run_id` is refreshed with the same TTL.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
    ttl: Duration,
    history_len: usize,
}

impl StatusTracker {
    #[must_use]
    pub fn new(store: Arc<dyn StatusStore>, ttl: Duration, history_len: usize) -> Self {
        Self {
            store,
            ttl,
            history_len,
        }
    }

    #[must_use]
    pub fn from_config(store: Arc<dyn StatusStore>, config: &TrainingConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.status_ttl_secs),
            config.history_len,
        )
    }

    /// Current snapshot, or the idle record when nothing is stored.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or holds a malformed record.
    pub async fn read(&self) -> Result<Run> {
        Ok(self.store.load_run().await?.unwrap_or_else(Run::idle))
    }

    /// Replaces the stored record.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub async fn write(&self, run: &Run) -> Result<()> {
        self.store
            .save_run(run, self.ttl)
            .await
            .context("Failed to persist run status")?;

        if let (true, Some(run_id)) = (run.is_running(), run.run_id.as_deref()) {
            self.store
                .refresh_lock(run_id, self.ttl)
                .await
                .context("Failed to refresh run lock")?;
        }
        Ok(())
    }

    /// Writes mid-run snapshots. A failure is logged; the next write replaces the record.
    pub async fn write_or_log(&self, run: &Run) {
        if let Err(e) = self.write(run).await {
            error!("Status write failed: {:#}", e);
        }
    }

    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn lock(&self, run_id: &str) -> Result<bool> {
        self.store
            .try_lock(run_id, self.ttl)
            .await
            .context("Failed to acquire run lock")
    }

    pub async fn release(&self, run_id: &str) {
        if let Err(e) = self.store.release_lock(run_id).await {
            error!("Failed to release run lock {}: {:#}", run_id, e);
        }
    }

    /// Appends the finished run to the capped run history.
    pub async fn record_history(&self, summary: &RunSummary) {
        match self.store.push_history(summary, self.history_len).await {
            Ok(()) => info!(
                "Recorded run {} in history",
                summary.run_id.as_deref().unwrap_or("-")
            ),
            Err(e) => error!("Failed to record run history: {:#}", e),
        }
    }
}
