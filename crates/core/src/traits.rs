use crate::candles::{Candle, CandleQuery, LatestQuote};
use crate::horizon::Horizon;
use crate::market::{Bar, SignalReading};
use crate::run::{Run, RunSummary};
use crate::start::StartSignal;
use crate::table::FeatureTable;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Historical bar store queried by ticker and time range.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn count_bars(&self, ticker: &str, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<i64>;

    /// Bars ordered by timestamp ascending.
    async fn load_bars(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;
}

/// Read-only chart access to the bar store.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// The most recent `query.limit` candles in range, oldest first.
    async fn candles(&self, query: &CandleQuery) -> Result<Vec<Candle>>;

    /// Newest bar for `ticker` priced against the close before it.
    async fn latest(&self, ticker: &str) -> Result<Option<LatestQuote>>;
}

/// Side-signal store. Implementations must include the latest reading before
/// `start` so the first bars of the window can be joined as-of.
#[async_trait]
pub trait SideSignalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn readings(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SignalReading>>;
}

/// Provider of ticker candidates (owned positions, recommendations).
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Ok(vec![])` when the source holds nothing; `Err` when it cannot be read or parsed.
    async fn tickers(&self) -> Result<Vec<String>>;
}

/// Backing store for the run record, the run lock, the start signal, and run history.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn load_run(&self) -> Result<Option<Run>>;

    /// Replaces the whole record and sets its expiry.
    async fn save_run(&self, run: &Run, ttl: Duration) -> Result<()>;

    /// Atomically takes the run lock for `owner`. Returns false if another owner holds it.
    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool>;

    async fn refresh_lock(&self, owner: &str, ttl: Duration) -> Result<()>;

    /// Releases the lock only if `owner` still holds it.
    async fn release_lock(&self, owner: &str) -> Result<()>;

    async fn put_start_signal(&self, signal: &StartSignal, ttl: Duration) -> Result<()>;

    /// Reads and removes the pending start signal in one step.
    async fn take_start_signal(&self) -> Result<Option<StartSignal>>;

    async fn push_history(&self, summary: &RunSummary, keep: usize) -> Result<()>;

    /// Most recent summaries first.
    async fn history(&self, limit: usize) -> Result<Vec<RunSummary>>;

    async fn history_len(&self) -> Result<usize>;
}

/// Where a fitted model for (ticker, horizon) lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub ticker: String,
    pub horizon: Horizon,
    pub name: String,
    pub path: PathBuf,
}

/// Handle to a fitted model, usable for prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedModel {
    pub artifact: ArtifactRef,
}

/// Opaque model-fitting capability bounded by a wall-clock budget.
#[async_trait]
pub trait ModelFitter: Send + Sync {
    async fn fit(
        &self,
        table: &FeatureTable,
        target_column: &str,
        time_budget: Duration,
        artifact: &ArtifactRef,
    ) -> Result<FittedModel>;

    /// One prediction per row of `table`.
    async fn predict(&self, model: &FittedModel, table: &FeatureTable) -> Result<Vec<f64>>;
}
