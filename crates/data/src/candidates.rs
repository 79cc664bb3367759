//! Candidate ticker lists published into Redis by other services.
//!
//! Payloads seen in the wild: a plain array of tickers, an array of position or
//! recommendation records with a `ticker` field, or `{"positions": [...]}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use qbot_core::CandidateSource;
use redis::aio::MultiplexedConnection;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandidatePayload {
    List(Vec<CandidateEntry>),
    Wrapped { positions: Vec<CandidateEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandidateEntry {
    Ticker(String),
    Record { ticker: String },
}

impl CandidateEntry {
    fn into_ticker(self) -> String {
        match self {
            Self::Ticker(ticker) | Self::Record { ticker } => ticker,
        }
    }
}

/// Extracts tickers from a candidate payload, in payload order.
///
/// # Errors
/// Returns an error if the payload matches none of the accepted shapes.
pub fn parse_candidates(json: &str) -> Result<Vec<String>> {
    let payload: CandidatePayload =
        serde_json::from_str(json).context("Unrecognized candidate payload")?;

    let entries = match payload {
        CandidatePayload::List(entries) | CandidatePayload::Wrapped { positions: entries } => {
            entries
        }
    };

    Ok(entries
        .into_iter()
        .map(CandidateEntry::into_ticker)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Candidate list stored as JSON under a single Redis key.
#[derive(Clone)]
pub struct RedisCandidateSource {
    name: String,
    key: String,
    conn: MultiplexedConnection,
}

impl RedisCandidateSource {
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>, conn: MultiplexedConnection) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            conn,
        }
    }
}

#[async_trait]
impl CandidateSource for RedisCandidateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tickers(&self) -> Result<Vec<String>> {
        let data: Option<String> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut self.conn.clone())
            .await
            .with_context(|| format!("Failed to read {}", self.key))?;

        match data {
            Some(json) => parse_candidates(&json),
            None => Ok(Vec::new()),
        }
    }
}
