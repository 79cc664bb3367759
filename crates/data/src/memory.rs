//! In-process [`StatusStore`] with the same expiry and lock semantics as Redis.
//!
//! The store for tests and for embedding the orchestrator in-process; the
//! service binaries always use Redis. A store built with
//! [`MemoryStatusStore::with_journal`] also keeps every saved record.

use anyhow::Result;
use async_trait::async_trait;
use qbot_core::{Run, RunSummary, StartSignal, StatusStore};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    run: Option<Expiring<Run>>,
    lock: Option<Expiring<String>>,
    signal: Option<Expiring<StartSignal>>,
    history: VecDeque<RunSummary>,
    journal: Option<Vec<Run>>,
}

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    state: Mutex<MemoryState>,
}

impl MemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that records every saved run. The journal is unbounded.
    #[must_use]
    pub fn with_journal() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                journal: Some(Vec::new()),
                ..MemoryState::default()
            }),
        }
    }

    /// Every record passed to `save_run`, oldest first. Empty without a journal.
    pub async fn journal(&self) -> Vec<Run> {
        self.state.lock().await.journal.clone().unwrap_or_default()
    }

    /// Current lock owner, if the lock is held and unexpired.
    pub async fn lock_owner(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .lock
            .as_ref()
            .filter(|l| l.is_live())
            .map(|l| l.value.clone())
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load_run(&self) -> Result<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state
            .run
            .as_ref()
            .filter(|r| r.is_live())
            .map(|r| r.value.clone()))
    }

    async fn save_run(&self, run: &Run, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.run = Some(Expiring::new(run.clone(), ttl));
        if let Some(journal) = state.journal.as_mut() {
            journal.push(run.clone());
        }
        Ok(())
    }

    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.lock.as_ref().is_some_and(Expiring::is_live) {
            return Ok(false);
        }
        state.lock = Some(Expiring::new(owner.to_string(), ttl));
        Ok(true)
    }

    async fn refresh_lock(&self, owner: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(lock) = state.lock.as_mut() {
            if lock.is_live() && lock.value == owner {
                lock.expires_at = Instant::now() + ttl;
            }
        }
        Ok(())
    }

    async fn release_lock(&self, owner: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.lock.as_ref().is_some_and(|l| l.value == owner) {
            state.lock = None;
        }
        Ok(())
    }

    async fn put_start_signal(&self, signal: &StartSignal, ttl: Duration) -> Result<()> {
        self.state.lock().await.signal = Some(Expiring::new(signal.clone(), ttl));
        Ok(())
    }

    async fn take_start_signal(&self) -> Result<Option<StartSignal>> {
        let mut state = self.state.lock().await;
        Ok(state
            .signal
            .take()
            .filter(Expiring::is_live)
            .map(|s| s.value))
    }

    async fn push_history(&self, summary: &RunSummary, keep: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.history.push_front(summary.clone());
        state.history.truncate(keep.max(1));
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let state = self.state.lock().await;
        Ok(state.history.iter().take(limit).cloned().collect())
    }

    async fn history_len(&self) -> Result<usize> {
        Ok(self.state.lock().await.history.len())
    }
}
