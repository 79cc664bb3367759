//! [`ModelFitter`] backed by an external training program.
//!
//! The program is invoked as
//! `<command> <args..> fit --data <csv> --label target --time-limit <secs> --model-dir <dir>`
//! and `<command> <args..> predict --data <csv> --model-dir <dir> --output <csv>`.
//! Training data is exchanged as CSV with a header row; missing cells are empty.
//! Prediction output must contain a `prediction` column with one row per input row.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use csv::{Reader, Writer};
use qbot_core::{ArtifactRef, FeatureTable, FittedModel, FitterConfig, Horizon, ModelFitter};
use std::fs::File;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const LABEL: &str = "target";
const PREDICTION: &str = "prediction";

#[derive(Debug, Clone)]
pub struct ExternalProcessFitter {
    command: String,
    args: Vec<String>,
}

impl ExternalProcessFitter {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_config(config: &FitterConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ModelFitter for ExternalProcessFitter {
    async fn fit(
        &self,
        table: &FeatureTable,
        target_column: &str,
        time_budget: Duration,
        artifact: &ArtifactRef,
    ) -> Result<FittedModel> {
        let horizon = Horizon::ALL
            .into_iter()
            .find(|h| h.target_column() == target_column)
            .ok_or_else(|| anyhow!("Unknown target column {target_column}"))?;

        let workdir = tempfile::tempdir().context("Failed to create fitter workdir")?;
        let data = workdir.path().join("train.csv");
        write_table(&data, table, Some(table.target(horizon)))?;

        debug!(
            "Fitting {} on {} rows ({}s budget)",
            artifact.name,
            table.len(),
            time_budget.as_secs()
        );

        let output = self
            .command()
            .arg("fit")
            .arg("--data")
            .arg(&data)
            .arg("--label")
            .arg(LABEL)
            .arg("--time-limit")
            .arg(time_budget.as_secs().to_string())
            .arg("--model-dir")
            .arg(&artifact.path)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.command))?;
        check_status("fit", &output)?;

        Ok(FittedModel {
            artifact: artifact.clone(),
        })
    }

    async fn predict(&self, model: &FittedModel, table: &FeatureTable) -> Result<Vec<f64>> {
        let workdir = tempfile::tempdir().context("Failed to create fitter workdir")?;
        let data = workdir.path().join("features.csv");
        let out = workdir.path().join("predictions.csv");
        write_table(&data, table, None)?;

        let output = self
            .command()
            .arg("predict")
            .arg("--data")
            .arg(&data)
            .arg("--model-dir")
            .arg(&model.artifact.path)
            .arg("--output")
            .arg(&out)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.command))?;
        check_status("predict", &output)?;

        let predictions = read_predictions(&out)?;
        if predictions.len() != table.len() {
            bail!(
                "Fitter returned {} predictions for {} rows",
                predictions.len(),
                table.len()
            );
        }
        Ok(predictions)
    }
}

fn check_status(step: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    bail!("Fitter {} exited with {}: {}", step, output.status, tail.join(" | "))
}

/// Writes feature columns, plus the label column when `target` is given.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_table(path: &Path, table: &FeatureTable, target: Option<&[f64]>) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    let mut writer = Writer::from_writer(file);

    let mut header = table.feature_names();
    if target.is_some() {
        header.push(LABEL);
    }
    writer.write_record(&header)?;

    for row in 0..table.len() {
        let mut record: Vec<String> = table
            .features
            .iter()
            .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default())
            .collect();
        if let Some(target) = target {
            record.push(target[row].to_string());
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Reads the `prediction` column of a fitter output file.
///
/// # Errors
/// Returns an error if the file is unreadable, lacks the column, or holds a non-numeric value.
pub fn read_predictions(path: &Path) -> Result<Vec<f64>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open predictions: {}", path.display()))?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| h == PREDICTION)
        .ok_or_else(|| anyhow!("Predictions file has no {PREDICTION} column"))?;

    reader
        .records()
        .enumerate()
        .map(|(row, record)| -> Result<f64> {
            let record = record?;
            let value = record.get(column).unwrap_or_default();
            value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Bad prediction {value:?} at row {row}"))
        })
        .collect()
}
