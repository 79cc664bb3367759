//! Fitted-model artifacts on disk.
//!
//! Every model lives in its own directory named
//! `autogluon_model_<TICKER>_<MINUTES>` under the models root. Downstream
//! consumers enumerate models by that name, so it must not change.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use qbot_core::{is_valid_ticker, ArtifactRef, Horizon};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MODEL_DIR_PREFIX: &str = "autogluon_model_";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub ticker: String,
    pub horizon: String,
    pub path: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ModelStatistics {
    pub unique_tickers: usize,
    pub unique_horizons: usize,
    pub by_ticker: BTreeMap<String, usize>,
    pub by_horizon: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ModelListing {
    pub models: Vec<ModelEntry>,
    pub total: usize,
    pub statistics: ModelStatistics,
}

#[derive(Debug, Clone)]
pub struct ModelInventory {
    root: PathBuf,
}

impl ModelInventory {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Artifact location for a (ticker, horizon) pair.
    ///
    /// # Errors
    /// Returns an error if the ticker is not a valid symbol, which keeps the
    /// artifact directory a direct child of the models root.
    pub fn artifact_for(&self, ticker: &str, horizon: Horizon) -> Result<ArtifactRef> {
        if !is_valid_ticker(ticker) {
            bail!("Invalid ticker for model artifact: {:?}", ticker);
        }
        let name = format!("{MODEL_DIR_PREFIX}{ticker}_{}", horizon.minutes());
        Ok(ArtifactRef {
            ticker: ticker.to_string(),
            horizon,
            path: self.root.join(&name),
            name,
        })
    }

    /// Lists model directories, newest first. A missing root yields an empty listing.
    ///
    /// # Errors
    /// Returns an error if the root exists but cannot be read.
    pub async fn list(&self) -> Result<ModelListing> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ModelListing::default())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.root.display()))
            }
        };

        let mut models = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((ticker, horizon)) = parse_model_name(&name) else {
                continue;
            };
            let last_modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            models.push(ModelEntry {
                ticker,
                horizon,
                path: name,
                last_modified,
            });
        }

        Ok(summarize(models))
    }
}

/// Splits `autogluon_model_<TICKER>_<HORIZON>` into its parts.
///
/// The horizon is the segment after the last underscore, so tickers may contain underscores.
#[must_use]
pub fn parse_model_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix(MODEL_DIR_PREFIX)?;
    let (ticker, horizon) = rest.rsplit_once('_')?;
    if ticker.is_empty() || horizon.is_empty() {
        return None;
    }
    Some((ticker.to_string(), horizon.to_string()))
}

fn summarize(mut models: Vec<ModelEntry>) -> ModelListing {
    models.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let mut statistics = ModelStatistics::default();
    for model in &models {
        *statistics.by_ticker.entry(model.ticker.clone()).or_default() += 1;
        *statistics.by_horizon.entry(model.horizon.clone()).or_default() += 1;
    }
    statistics.unique_tickers = statistics.by_ticker.len();
    statistics.unique_horizons = statistics.by_horizon.len();

    ModelListing {
        total: models.len(),
        models,
        statistics,
    }
}
