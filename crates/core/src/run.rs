//! The persisted run record polled by status readers.
//!
//! A [`Run`] is only ever mutated through its methods so the counters keep
//! their invariants: `total_models` is fixed at [`Run::begin`],
//! `completed_models` and `progress_percent` only grow, and
//! `completed_tickers` and `error_log` are append-only.

use crate::horizon::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Schema version written into every persisted run.
pub const RUN_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerStatus {
    /// Horizons are still being fitted. Replaced before the next ticker starts.
    Training,
    InsufficientData,
    LoadFailed,
    InsufficientCleanData,
    Success,
    PartialSuccess,
    Failed,
    Exception,
}

impl TickerStatus {
    /// Status of a ticker that reached the fitting stage.
    #[must_use]
    pub const fn from_successes(successes: usize) -> Self {
        if successes >= Horizon::ALL.len() {
            Self::Success
        } else if successes > 0 {
            Self::PartialSuccess
        } else {
            Self::Failed
        }
    }

    #[must_use]
    pub const fn counts_as_completed(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }
}

/// Outcome of fitting one (ticker, horizon) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelResult {
    Success {
        mae: f64,
        mape: Option<f64>,
        r2: Option<f64>,
        rows: usize,
        artifact_ref: String,
    },
    Failed {
        error: String,
    },
}

impl ModelResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TickerResult {
    pub ticker: String,
    pub status: TickerStatus,
    pub models: BTreeMap<Horizon, ModelResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TickerResult {
    #[must_use]
    pub fn new(ticker: impl Into<String>, status: TickerStatus) -> Self {
        Self {
            ticker: ticker.into(),
            status,
            models: BTreeMap::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn successful_models(&self) -> usize {
        self.models.values().filter(|m| m.is_success()).count()
    }
}

/// Compact record of a finished run kept in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tickers: usize,
    pub completed_tickers: usize,
    pub total_models: usize,
    pub completed_models: usize,
    pub error_count: usize,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed run record: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Run {
    #[serde(deserialize_with = "current_version")]
    pub version: u32,
    #[serde(deserialize_with = "present")]
    pub run_id: Option<String>,
    pub status: RunStatus,
    #[serde(deserialize_with = "present")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "present")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tickers: usize,
    pub total_models: usize,
    #[serde(deserialize_with = "present")]
    pub current_ticker: Option<String>,
    #[serde(deserialize_with = "present")]
    pub current_horizon: Option<Horizon>,
    pub completed_tickers: Vec<String>,
    pub completed_models: usize,
    pub progress_percent: u8,
    pub error_log: Vec<String>,
    /// Entries not appended because the error log reached its cap.
    pub error_log_truncated: usize,
    pub ticker_results: BTreeMap<String, TickerResult>,
}

// Nullable fields must still be present in the document.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

fn current_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u32::deserialize(deserializer)?;
    if version == RUN_RECORD_VERSION {
        Ok(version)
    } else {
        Err(serde::de::Error::custom(format!(
            "unsupported run record version {version}, expected {RUN_RECORD_VERSION}"
        )))
    }
}

impl Run {
    /// The record reported when no run has been persisted (or it expired).
    #[must_use]
    pub fn idle() -> Self {
        Self {
            version: RUN_RECORD_VERSION,
            run_id: None,
            status: RunStatus::Idle,
            started_at: None,
            completed_at: None,
            total_tickers: 0,
            total_models: 0,
            current_ticker: None,
            current_horizon: None,
            completed_tickers: Vec::new(),
            completed_models: 0,
            progress_percent: 0,
            error_log: Vec::new(),
            error_log_truncated: 0,
            ticker_results: BTreeMap::new(),
        }
    }

    /// Initializes a running record with the full plan.
    #[must_use]
    pub fn begin(run_id: impl Into<String>, tickers: &[String], now: DateTime<Utc>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            status: RunStatus::Running,
            started_at: Some(now),
            total_tickers: tickers.len(),
            total_models: tickers.len() * Horizon::ALL.len(),
            ..Self::idle()
        }
    }

    /// Parses a persisted record, rejecting unknown, missing, or mis-versioned fields.
    ///
    /// # Errors
    /// Returns [`RecordError::Malformed`] if the document does not match the schema.
    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns [`RecordError::Malformed`] if serialization fails.
    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn start_ticker(&mut self, ticker: &str) {
        self.current_ticker = Some(ticker.to_string());
        self.current_horizon = None;
    }

    pub fn start_horizon(&mut self, ticker: &str, horizon: Horizon) {
        self.current_horizon = Some(horizon);
        self.ticker_results
            .entry(ticker.to_string())
            .or_insert_with(|| TickerResult::new(ticker, TickerStatus::Training));
    }

    /// Stores a horizon outcome. Successes advance the model counter, failures
    /// append `"ticker: horizon: reason"` to the error log.
    pub fn record_model(
        &mut self,
        ticker: &str,
        horizon: Horizon,
        result: ModelResult,
        max_errors: usize,
    ) {
        match &result {
            ModelResult::Success { .. } => {
                self.completed_models = (self.completed_models + 1).min(self.total_models);
                self.progress_percent = self
                    .progress_percent
                    .max(progress(self.completed_models, self.total_models));
            }
            ModelResult::Failed { error } => {
                self.push_error(format!("{ticker}: {horizon}: {error}"), max_errors);
            }
        }

        self.ticker_results
            .entry(ticker.to_string())
            .or_insert_with(|| TickerResult::new(ticker, TickerStatus::Training))
            .models
            .insert(horizon, result);
    }

    /// Records a ticker that stopped before fitting (gate, load, or build failure).
    pub fn fail_ticker(
        &mut self,
        ticker: &str,
        status: TickerStatus,
        reason: impl Into<String>,
        max_errors: usize,
    ) {
        let reason = reason.into();
        self.push_error(format!("{ticker}: {reason}"), max_errors);
        self.ticker_results.insert(
            ticker.to_string(),
            TickerResult::new(ticker, status).with_error(reason),
        );
    }

    /// Derives the ticker status from its fitted horizons and returns it.
    pub fn close_ticker(&mut self, ticker: &str) -> TickerStatus {
        let entry = self
            .ticker_results
            .entry(ticker.to_string())
            .or_insert_with(|| TickerResult::new(ticker, TickerStatus::Training));
        let status = TickerStatus::from_successes(entry.successful_models());
        entry.status = status;

        if status.counts_as_completed() && !self.completed_tickers.iter().any(|t| t == ticker) {
            self.completed_tickers.push(ticker.to_string());
        }
        self.current_horizon = None;
        status
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(now);
        self.current_ticker = None;
        self.current_horizon = None;
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_tickers: self.total_tickers,
            completed_tickers: self.completed_tickers.len(),
            total_models: self.total_models,
            completed_models: self.completed_models,
            error_count: self.error_log.len() + self.error_log_truncated,
        }
    }

    fn push_error(&mut self, entry: String, max_errors: usize) {
        if self.error_log.len() < max_errors {
            self.error_log.push(entry);
        } else {
            self.error_log_truncated += 1;
        }
    }
}

/// Rounded share of finished models, 0–100.
#[must_use]
pub const fn progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = if completed > total { total } else { completed };
    #[allow(clippy::cast_possible_truncation)]
    let percent = ((completed * 100 + total / 2) / total) as u8;
    percent
}
