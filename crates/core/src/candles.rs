//! Chart candles over the bar store at selectable timeframes.

use crate::market::Bar;
use crate::start::is_valid_ticker;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CANDLE_LIMIT: i64 = 100;
pub const MAX_CANDLE_LIMIT: i64 = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CandleError {
    #[error("Invalid timeframe {0:?}. Allowed: 1min, 5min, 15min, 30min, 1hour, 4hour, 1day")]
    UnknownTimeframe(String),

    #[error("Invalid datetime format: {0}")]
    InvalidTimestamp(String),

    #[error("Parameter 'end' must not be before 'start'")]
    EndBeforeStart,

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Parameter 'timeframes' must not be empty")]
    NoTimeframes,
}

/// Candle width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "1hour")]
    Hour1,
    #[serde(rename = "4hour")]
    Hour4,
    #[serde(rename = "1day")]
    Day1,
}

impl Timeframe {
    pub const ALL: [Self; 7] = [
        Self::Min1,
        Self::Min5,
        Self::Min15,
        Self::Min30,
        Self::Hour1,
        Self::Hour4,
        Self::Day1,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1min",
            Self::Min5 => "5min",
            Self::Min15 => "15min",
            Self::Min30 => "30min",
            Self::Hour1 => "1hour",
            Self::Hour4 => "4hour",
            Self::Day1 => "1day",
        }
    }

    /// Continuous aggregate holding pre-bucketed candles, if one exists.
    #[must_use]
    pub const fn aggregate_view(self) -> Option<&'static str> {
        match self {
            Self::Min15 => Some("market_data_15min"),
            Self::Hour1 => Some("market_data_1hour"),
            Self::Day1 => Some("market_data_1day"),
            _ => None,
        }
    }

    /// SQL expression bucketing `market_data.time` to this width.
    #[must_use]
    pub const fn bucket_expr(self) -> &'static str {
        match self {
            Self::Min1 => "date_trunc('minute', time)",
            Self::Min5 => {
                "date_trunc('hour', time) + INTERVAL '5 minutes' * FLOOR(EXTRACT(minute FROM time) / 5)"
            }
            Self::Min15 => {
                "date_trunc('hour', time) + INTERVAL '15 minutes' * FLOOR(EXTRACT(minute FROM time) / 15)"
            }
            Self::Min30 => {
                "date_trunc('hour', time) + INTERVAL '30 minutes' * FLOOR(EXTRACT(minute FROM time) / 30)"
            }
            Self::Hour1 => "date_trunc('hour', time)",
            Self::Hour4 => {
                "date_trunc('day', time) + INTERVAL '4 hours' * FLOOR(EXTRACT(hour FROM time) / 4)"
            }
            Self::Day1 => "date_trunc('day', time)",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CandleError::UnknownTimeframe(s.to_string()))
    }
}

/// Parses a comma-separated timeframe list, keeping request order.
///
/// # Errors
/// Returns an error for an unknown timeframe or an empty list.
pub fn parse_timeframes(list: &str) -> Result<Vec<Timeframe>, CandleError> {
    let mut frames = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let frame = part.parse()?;
        if !frames.contains(&frame) {
            frames.push(frame);
        }
    }
    if frames.is_empty() {
        return Err(CandleError::NoTimeframes);
    }
    Ok(frames)
}

/// Parses RFC 3339, or a naive date or datetime read as UTC.
///
/// # Errors
/// Returns `CandleError::InvalidTimestamp` when no format matches.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CandleError> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    if let Some(t) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&t));
    }
    Err(CandleError::InvalidTimestamp(value.to_string()))
}

/// Defaults to 100 and clamps into `1..=1000`.
#[must_use]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.map_or(DEFAULT_CANDLE_LIMIT, |l| l.clamp(1, MAX_CANDLE_LIMIT))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleQuery {
    pub ticker: String,
    pub timeframe: Timeframe,
    pub limit: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl CandleQuery {
    /// Upper-cases the symbol and clamps the limit.
    ///
    /// # Errors
    /// Returns an error for a malformed symbol or an `end` before `start`.
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<i64>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, CandleError> {
        let ticker = normalize_symbol(symbol)?;
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(CandleError::EndBeforeStart);
            }
        }
        Ok(Self {
            ticker,
            timeframe,
            limit: clamp_limit(limit),
            start,
            end,
        })
    }
}

/// Trimmed, upper-cased symbol.
///
/// # Errors
/// Returns `CandleError::InvalidSymbol` if it is not a valid ticker.
pub fn normalize_symbol(symbol: &str) -> Result<String, CandleError> {
    let ticker = symbol.trim().to_ascii_uppercase();
    if !is_valid_ticker(&ticker) {
        return Err(CandleError::InvalidSymbol(symbol.to_string()));
    }
    Ok(ticker)
}

/// One chart candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: i64,
}

impl Candle {
    #[must_use]
    pub fn new(
        time: DateTime<Utc>,
        open: Option<Decimal>,
        high: Option<Decimal>,
        low: Option<Decimal>,
        close: Option<Decimal>,
        volume: Option<Decimal>,
    ) -> Self {
        Self {
            time,
            timestamp: time.timestamp(),
            open: open.and_then(|d| d.to_f64()),
            high: high.and_then(|d| d.to_f64()),
            low: low.and_then(|d| d.to_f64()),
            close: close.and_then(|d| d.to_f64()),
            volume: volume.and_then(|d| d.to_i64()).unwrap_or(0),
        }
    }
}

/// Newest price for a symbol and its change against the previous close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestQuote {
    pub symbol: String,
    pub price: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: i64,
    pub change: f64,
    pub change_percent: f64,
    pub time: DateTime<Utc>,
    pub timestamp: i64,
}

impl LatestQuote {
    /// Change and percent change are rounded to two places. Without a
    /// previous close, or with a zero one, they are zero.
    #[must_use]
    pub fn from_bar(symbol: impl Into<String>, bar: &Bar, prev_close: Option<Decimal>) -> Self {
        let prev = prev_close.unwrap_or(bar.close);
        let change = bar.close - prev;
        let change_percent = if prev.is_zero() {
            Decimal::ZERO
        } else {
            change / prev * Decimal::ONE_HUNDRED
        };

        Self {
            symbol: symbol.into(),
            price: bar.close.to_f64().unwrap_or_default(),
            open: bar.open.to_f64(),
            high: bar.high.to_f64(),
            low: bar.low.to_f64(),
            volume: bar.volume.to_i64().unwrap_or(0),
            change: change.round_dp(2).to_f64().unwrap_or_default(),
            change_percent: change_percent.round_dp(2).to_f64().unwrap_or_default(),
            time: bar.timestamp,
            timestamp: bar.timestamp.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("1HOUR".parse::<Timeframe>().unwrap(), Timeframe::Hour1);
        assert_eq!(" 5min ".parse::<Timeframe>().unwrap(), Timeframe::Min5);
        assert_eq!(
            "2min".parse::<Timeframe>(),
            Err(CandleError::UnknownTimeframe("2min".to_string()))
        );
        assert_eq!(serde_json::to_string(&Timeframe::Day1).unwrap(), r#""1day""#);
    }

    #[test]
    fn test_aggregate_views() {
        let with_view: Vec<_> = Timeframe::ALL
            .into_iter()
            .filter(|t| t.aggregate_view().is_some())
            .collect();
        assert_eq!(with_view, vec![Timeframe::Min15, Timeframe::Hour1, Timeframe::Day1]);
    }

    #[test]
    fn test_parse_timeframes() {
        assert_eq!(
            parse_timeframes("15min, 1day,,15min").unwrap(),
            vec![Timeframe::Min15, Timeframe::Day1]
        );
        assert_eq!(parse_timeframes(" , "), Err(CandleError::NoTimeframes));
        assert!(parse_timeframes("15min,weekly").is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-10-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-01T02:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-10-01").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(250)), 250);
        assert_eq!(clamp_limit(Some(5000)), 1000);
    }

    #[test]
    fn test_query_validation() {
        let start = Utc.with_ymd_and_hms(2025, 10, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();

        let query = CandleQuery::new(" aapl", Timeframe::Min15, Some(5000), None, None).unwrap();
        assert_eq!(query.ticker, "AAPL");
        assert_eq!(query.limit, 1000);

        assert_eq!(
            CandleQuery::new("AAPL", Timeframe::Min15, None, Some(start), Some(end)),
            Err(CandleError::EndBeforeStart)
        );
        assert!(matches!(
            CandleQuery::new("../etc", Timeframe::Min15, None, None, None),
            Err(CandleError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_latest_quote_change() {
        let bar = Bar {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 30, 15, 59, 0).unwrap(),
            open: Decimal::new(10000, 2),
            high: Decimal::new(10300, 2),
            low: Decimal::new(9900, 2),
            close: Decimal::new(10250, 2),
            volume: Decimal::new(1200, 0),
        };

        let quote = LatestQuote::from_bar("AAPL", &bar, Some(Decimal::new(10000, 2)));
        assert!((quote.price - 102.5).abs() < 1e-9);
        assert!((quote.change - 2.5).abs() < 1e-9);
        assert!((quote.change_percent - 2.5).abs() < 1e-9);
        assert_eq!(quote.volume, 1200);
        assert_eq!(quote.timestamp, bar.timestamp.timestamp());

        let first = LatestQuote::from_bar("AAPL", &bar, None);
        assert_eq!(first.change, 0.0);
        assert_eq!(first.change_percent, 0.0);
    }
}
