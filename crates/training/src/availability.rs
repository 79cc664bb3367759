use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use qbot_core::{BarSource, TrainingConfig};
use std::sync::Arc;

/// Result of the availability gate for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub passes: bool,
    pub observed: i64,
}

/// Gates a ticker on the number of bars in a short recent window.
#[derive(Clone)]
pub struct DataAvailabilityChecker {
    bars: Arc<dyn BarSource>,
    min_rows: i64,
    window: Duration,
}

impl DataAvailabilityChecker {
    #[must_use]
    pub fn new(bars: Arc<dyn BarSource>, min_rows: i64, window: Duration) -> Self {
        Self {
            bars,
            min_rows,
            window,
        }
    }

    #[must_use]
    pub fn from_config(bars: Arc<dyn BarSource>, config: &TrainingConfig) -> Self {
        Self::new(
            bars,
            config.min_rows,
            Duration::days(config.availability_window_days),
        )
    }

    #[must_use]
    pub const fn min_rows(&self) -> i64 {
        self.min_rows
    }

    /// Counts bars over the trailing window ending now.
    ///
    /// # Errors
    /// Returns an error if the bar store cannot be queried.
    pub async fn check(&self, ticker: &str) -> Result<Availability> {
        let end = Utc::now();
        let start = end - self.window;
        let observed = self
            .bars
            .count_bars(ticker, start, end)
            .await
            .with_context(|| format!("Failed to count bars for {ticker}"))?;

        Ok(Availability {
            passes: observed >= self.min_rows,
            observed,
        })
    }
}
