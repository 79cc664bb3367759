use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV observation for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A side-signal value as published at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Readings for one named side signal, ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSeries {
    pub name: String,
    pub readings: Vec<SignalReading>,
}

impl SignalSeries {
    #[must_use]
    pub fn new(name: impl Into<String>, mut readings: Vec<SignalReading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self {
            name: name.into(),
            readings,
        }
    }

    /// A series with no readings; every bar sees the signal as missing.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}
