//! Sequential training run: select, gate, build, fit, score, record.
//!
//! One ticker and one horizon at a time, in selector order. Every failure is
//! turned into a ticker or horizon status; nothing past the guard and ticker
//! selection can reject or abort a run.

use crate::availability::DataAvailabilityChecker;
use crate::features::{FeatureBuilder, FeatureError};
use crate::metrics;
use crate::tracker::StatusTracker;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use qbot_core::{
    normalize_tickers, Bar, BarSource, FeatureTable, Horizon, ModelFitter, ModelResult, Run,
    SideSignalSource, SignalSeries, StartOutcome, StartRejection, StatusStore, TickerStatus,
    TrainingConfig,
};
use qbot_data::ModelInventory;
use qbot_token_selector::TickerSelector;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// External handles a run works against.
pub struct Collaborators {
    pub selector: TickerSelector,
    pub bars: Arc<dyn BarSource>,
    pub side_signals: Vec<Arc<dyn SideSignalSource>>,
    pub fitter: Arc<dyn ModelFitter>,
    pub store: Arc<dyn StatusStore>,
    pub inventory: ModelInventory,
}

pub struct Orchestrator {
    selector: TickerSelector,
    checker: DataAvailabilityChecker,
    bars: Arc<dyn BarSource>,
    side_signals: Vec<Arc<dyn SideSignalSource>>,
    builder: FeatureBuilder,
    fitter: Arc<dyn ModelFitter>,
    tracker: StatusTracker,
    inventory: ModelInventory,
    config: TrainingConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: TrainingConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            selector,
            bars,
            side_signals,
            fitter,
            store,
            inventory,
        } = collaborators;

        Self {
            selector,
            checker: DataAvailabilityChecker::from_config(bars.clone(), &config),
            bars,
            side_signals,
            builder: FeatureBuilder::new(config.min_clean_rows),
            fitter,
            tracker: StatusTracker::from_config(store, &config),
            inventory,
            config,
        }
    }

    /// Runs training to completion unless another run holds the lock or no
    /// tickers are available.
    ///
    /// An explicit ticker list is trimmed and deduplicated; an empty list
    /// falls back to the selector.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached to take the lock or to
    /// persist the initial record. The lock is released in the latter case.
    pub async fn start(&self, tickers: Option<Vec<String>>) -> Result<StartOutcome> {
        let current = match self.tracker.read().await {
            Ok(run) => run,
            Err(e) => {
                warn!("Ignoring unreadable run status: {:#}", e);
                Run::idle()
            }
        };
        if current.is_running() {
            info!("Start rejected: run {:?} in progress", current.run_id);
            return Ok(StartOutcome::Rejected(StartRejection::already_running(
                &current,
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        if !self.tracker.lock(&run_id).await? {
            let holder = self.tracker.read().await.unwrap_or(current);
            info!("Start rejected: run lock is held");
            return Ok(StartOutcome::Rejected(StartRejection::already_running(
                &holder,
            )));
        }

        let tickers = match self.resolve_tickers(tickers).await {
            Ok(tickers) => tickers,
            Err(e) => {
                warn!("Start rejected: {:#}", e);
                self.tracker.release(&run_id).await;
                return Ok(StartOutcome::Rejected(StartRejection::NoTickers));
            }
        };

        let mut run = Run::begin(run_id.as_str(), &tickers, Utc::now());
        if let Err(e) = self.tracker.write(&run).await {
            self.tracker.release(&run_id).await;
            return Err(e.context("Failed to initialize run"));
        }

        info!(
            "Run {} started: {} tickers, {} models",
            run_id, run.total_tickers, run.total_models
        );

        for (index, ticker) in tickers.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, tickers.len(), ticker);
            self.train_ticker(&mut run, ticker).await;
        }

        run.complete(Utc::now());
        self.tracker.write_or_log(&run).await;
        self.tracker.release(&run_id).await;
        self.tracker.record_history(&run.summary()).await;

        info!(
            "Run {} completed: {}/{} models, {} tickers trained, {} errors",
            run_id,
            run.completed_models,
            run.total_models,
            run.completed_tickers.len(),
            run.error_log.len() + run.error_log_truncated
        );

        Ok(StartOutcome::Completed(Box::new(run)))
    }

    async fn resolve_tickers(&self, tickers: Option<Vec<String>>) -> Result<Vec<String>> {
        let explicit = tickers.map(normalize_tickers).unwrap_or_default();
        if explicit.is_empty() {
            self.selector.select().await
        } else {
            Ok(explicit)
        }
    }

    async fn train_ticker(&self, run: &mut Run, ticker: &str) {
        run.start_ticker(ticker);
        self.tracker.write_or_log(run).await;

        let table = match self.prepare(ticker).await {
            Ok(table) => table,
            Err((status, reason)) => {
                warn!("{}: {:?}: {}", ticker, status, reason);
                run.fail_ticker(ticker, status, reason, self.config.max_error_log);
                self.tracker.write_or_log(run).await;
                return;
            }
        };

        for horizon in Horizon::ALL {
            run.start_horizon(ticker, horizon);
            self.tracker.write_or_log(run).await;

            let result = match self.fit_horizon(&table, horizon).await {
                Ok(result) => {
                    if let ModelResult::Success { mae, r2, .. } = &result {
                        info!("{} {}: MAE={:.4} R2={:?}", ticker, horizon, mae, r2);
                    }
                    result
                }
                Err(e) => {
                    warn!("{} {} failed: {:#}", ticker, horizon, e);
                    ModelResult::Failed {
                        error: format!("{e:#}"),
                    }
                }
            };

            run.record_model(ticker, horizon, result, self.config.max_error_log);
            self.tracker.write_or_log(run).await;
        }

        let status = run.close_ticker(ticker);
        self.tracker.write_or_log(run).await;
        info!("{} finished: {:?}", ticker, status);
    }

    /// Gate, load and build. Errors carry the ticker status to record.
    async fn prepare(&self, ticker: &str) -> Result<FeatureTable, (TickerStatus, String)> {
        let availability = self.checker.check(ticker).await.map_err(|e| {
            error!("Availability check failed for {}: {:#}", ticker, e);
            (TickerStatus::Exception, format!("{e:#}"))
        })?;
        if !availability.passes {
            return Err((
                TickerStatus::InsufficientData,
                format!(
                    "Only {} rows (need {})",
                    availability.observed,
                    self.checker.min_rows()
                ),
            ));
        }

        let (bars, signals) = self
            .load(ticker)
            .await
            .map_err(|e| (TickerStatus::LoadFailed, format!("Failed to load data: {e:#}")))?;
        if i64::try_from(bars.len()).unwrap_or(i64::MAX) < self.config.min_rows {
            return Err((
                TickerStatus::LoadFailed,
                format!("Failed to load data: only {} bars", bars.len()),
            ));
        }

        self.builder
            .build(ticker, bars, &signals)
            .map_err(|e| match e {
                FeatureError::InsufficientCleanRows { .. } => {
                    (TickerStatus::InsufficientCleanData, e.to_string())
                }
                FeatureError::EmptyInput => (TickerStatus::LoadFailed, e.to_string()),
            })
    }

    async fn load(&self, ticker: &str) -> Result<(Vec<Bar>, Vec<SignalSeries>)> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(self.config.lookback_days);

        let bars = self
            .bars
            .load_bars(ticker, start, end)
            .await
            .with_context(|| format!("Failed to load bars for {ticker}"))?;

        let mut signals = Vec::with_capacity(self.side_signals.len());
        for source in &self.side_signals {
            let series = match source.readings(ticker, start, end).await {
                Ok(readings) => SignalSeries::new(source.name(), readings),
                Err(e) => {
                    warn!(
                        "Side signal {} unavailable for {}: {:#}",
                        source.name(),
                        ticker,
                        e
                    );
                    SignalSeries::missing(source.name())
                }
            };
            signals.push(series);
        }

        Ok((bars, signals))
    }

    async fn fit_horizon(&self, table: &FeatureTable, horizon: Horizon) -> Result<ModelResult> {
        let artifact = self.inventory.artifact_for(&table.ticker, horizon)?;
        let budget = Duration::from_secs(self.config.time_budget_secs);

        let model = self
            .bounded(
                "fit",
                self.fitter
                    .fit(table, horizon.target_column(), budget, &artifact),
            )
            .await?;
        let predictions = self
            .bounded("predict", self.fitter.predict(&model, table))
            .await?;
        let scores = metrics::calculate(table.target(horizon), &predictions)?;

        Ok(ModelResult::Success {
            mae: scores.mae,
            mape: scores.mape,
            r2: scores.r2,
            rows: table.len(),
            artifact_ref: artifact.path.display().to_string(),
        })
    }

    /// Abandons `call` once the time budget plus grace has elapsed.
    async fn bounded<T>(&self, step: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let ceiling =
            Duration::from_secs(self.config.time_budget_secs + self.config.fit_grace_secs);
        tokio::time::timeout(ceiling, call)
            .await
            .map_err(|_| anyhow!("{} exceeded {}s", step, ceiling.as_secs()))?
    }
}
