use anyhow::{bail, Result};
use qbot_core::{normalize_tickers, CandidateSource};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the ordered ticker list for a run: owned positions first, then
/// recommended candidates, deduplicated by first occurrence.
#[derive(Clone)]
pub struct TickerSelector {
    owned: Arc<dyn CandidateSource>,
    candidates: Arc<dyn CandidateSource>,
}

impl TickerSelector {
    /// Creates a new ticker selector.
    #[must_use]
    pub fn new(owned: Arc<dyn CandidateSource>, candidates: Arc<dyn CandidateSource>) -> Self {
        Self { owned, candidates }
    }

    /// Selects tickers in priority order.
    ///
    /// A source that cannot be read contributes nothing.
    ///
    /// # Errors
    /// Returns an error if neither source yields a ticker.
    pub async fn select(&self) -> Result<Vec<String>> {
        let owned = read_source(self.owned.as_ref()).await;
        let candidates = read_source(self.candidates.as_ref()).await;

        let owned_count = owned.len();
        let candidate_count = candidates.len();
        let tickers = normalize_tickers(owned.into_iter().chain(candidates));

        if tickers.is_empty() {
            bail!(
                "No tickers from {} or {}",
                self.owned.name(),
                self.candidates.name()
            );
        }

        info!(
            "Ticker selection complete: {} tickers ({} owned, {} candidates)",
            tickers.len(),
            owned_count,
            candidate_count
        );

        Ok(tickers)
    }
}

async fn read_source(source: &dyn CandidateSource) -> Vec<String> {
    match source.tickers().await {
        Ok(tickers) => {
            if tickers.is_empty() {
                warn!("Candidate source {} is empty", source.name());
            }
            tickers
        }
        Err(e) => {
            warn!("Candidate source {} unavailable: {:#}", source.name(), e);
            Vec::new()
        }
    }
}
