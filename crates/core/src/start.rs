use crate::horizon::Horizon;
use crate::run::Run;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short-lived request for a worker to begin a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSignal {
    pub requested_at: DateTime<Utc>,
    /// Explicit tickers; `None` lets the ticker selector decide.
    pub tickers: Option<Vec<String>>,
    pub source: String,
}

impl StartSignal {
    #[must_use]
    pub fn new(tickers: Option<Vec<String>>, source: impl Into<String>) -> Self {
        Self {
            requested_at: Utc::now(),
            tickers,
            source: source.into(),
        }
    }
}

/// Why a start request did not produce a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StartRejection {
    AlreadyRunning {
        current_ticker: Option<String>,
        current_horizon: Option<Horizon>,
        progress_percent: u8,
    },
    NoTickers,
}

impl StartRejection {
    #[must_use]
    pub fn already_running(run: &Run) -> Self {
        Self::AlreadyRunning {
            current_ticker: run.current_ticker.clone(),
            current_horizon: run.current_horizon,
            progress_percent: run.progress_percent,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "training already in progress",
            Self::NoTickers => "no tickers found",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Completed(Box<Run>),
    Rejected(StartRejection),
}

/// Longest ticker accepted from any source.
pub const MAX_TICKER_LEN: usize = 32;

/// A ticker is ASCII letters, digits, `.`, `_` and `-`, without `..`.
///
/// Tickers become artifact directory names, so anything that could act as a
/// path component is refused.
#[must_use]
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && !ticker.contains("..")
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Trims, drops blank and invalid tickers, and deduplicates by first occurrence.
#[must_use]
pub fn normalize_tickers<I, S>(tickers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique: Vec<String> = Vec::new();
    for ticker in tickers {
        let ticker = ticker.as_ref().trim();
        if is_valid_ticker(ticker) && !unique.iter().any(|t| t == ticker) {
            unique.push(ticker.to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_first_occurrence() {
        let tickers = normalize_tickers([" AAPL", "MSFT", "", "AAPL", "NVDA "]);
        assert_eq!(tickers, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn test_ticker_syntax() {
        assert!(is_valid_ticker("AAPL"));
        assert!(is_valid_ticker("BRK.B"));
        assert!(is_valid_ticker("BTC-USD"));
        assert!(is_valid_ticker("BRK_B"));
        assert!(!is_valid_ticker(""));
        assert!(!is_valid_ticker(".."));
        assert!(!is_valid_ticker("../../../tmp/evil"));
        assert!(!is_valid_ticker("a/b"));
        assert!(!is_valid_ticker("a\\b"));
        assert!(!is_valid_ticker("AA PL"));
        assert!(!is_valid_ticker(&"A".repeat(MAX_TICKER_LEN + 1)));
    }

    #[test]
    fn test_normalize_drops_path_like_tickers() {
        let tickers = normalize_tickers(["AAPL", "../../etc", "a/b", "MSFT"]);
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_rejection_serializes_reason() {
        let json = serde_json::to_string(&StartRejection::NoTickers).unwrap();
        assert_eq!(json, r#"{"reason":"no_tickers"}"#);
    }

    #[test]
    fn test_start_signal_roundtrip() {
        let signal = StartSignal::new(Some(vec!["AAPL".to_string()]), "api");
        let json = serde_json::to_string(&signal).unwrap();
        let back: StartSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signal);
    }
}
