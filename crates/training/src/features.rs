//! Bars plus point-in-time side signals into per-horizon training rows.
//!
//! Column layout, in order:
//! `open, high, low, close, volume, prev_close, prev_close_5, prev_close_15,
//! price_change, price_change_5, price_change_15, volatility, hour,
//! day_of_week`, then `<signal>, <signal>_missing` per side signal.
//!
//! Lag columns stay missing for the first rows of the window. Side-signal gaps
//! are filled with the column median (0.0 when the signal never reported) and
//! flagged in the matching `_missing` column. Rows without a value for every
//! horizon target are dropped, which removes the trailing bars.

use chrono::{Datelike, Timelike};
use qbot_core::{Bar, FeatureColumn, FeatureTable, Horizon, SignalSeries};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

const LAGS: [(usize, &str, &str); 3] = [
    (1, "prev_close", "price_change"),
    (5, "prev_close_5", "price_change_5"),
    (15, "prev_close_15", "price_change_15"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("No bars to build features from")]
    EmptyInput,

    #[error("Only {rows} clean rows")]
    InsufficientCleanRows { rows: usize, required: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    min_clean_rows: usize,
}

impl FeatureBuilder {
    #[must_use]
    pub const fn new(min_clean_rows: usize) -> Self {
        Self { min_clean_rows }
    }

    /// Builds the training table for one ticker.
    ///
    /// # Errors
    /// Returns [`FeatureError::EmptyInput`] when there are no bars and
    /// [`FeatureError::InsufficientCleanRows`] when fewer than the minimum rows
    /// have every horizon target.
    pub fn build(
        &self,
        ticker: &str,
        mut bars: Vec<Bar>,
        signals: &[SignalSeries],
    ) -> Result<FeatureTable, FeatureError> {
        if bars.is_empty() {
            return Err(FeatureError::EmptyInput);
        }
        bars.sort_by_key(|b| b.timestamp);

        let close: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
        let mut columns = vec![
            column("open", bars.iter().map(|b| Some(to_f64(b.open)))),
            column("high", bars.iter().map(|b| Some(to_f64(b.high)))),
            column("low", bars.iter().map(|b| Some(to_f64(b.low)))),
            column("close", close.iter().copied().map(Some)),
            column("volume", bars.iter().map(|b| Some(to_f64(b.volume)))),
        ];

        let lagged: Vec<Vec<Option<f64>>> = LAGS
            .iter()
            .map(|(lag, _, _)| lag_values(&close, *lag))
            .collect();
        for ((_, name, _), values) in LAGS.iter().zip(&lagged) {
            columns.push(column(name, values.iter().copied()));
        }
        for ((_, _, name), values) in LAGS.iter().zip(&lagged) {
            let deltas = close
                .iter()
                .zip(values)
                .map(|(c, prev)| prev.map(|p| c - p));
            columns.push(column(name, deltas));
        }

        columns.push(column(
            "volatility",
            bars.iter().map(|b| {
                (!b.close.is_zero()).then(|| to_f64(b.high - b.low) / to_f64(b.close))
            }),
        ));
        columns.push(column(
            "hour",
            bars.iter().map(|b| Some(f64::from(b.timestamp.hour()))),
        ));
        columns.push(column(
            "day_of_week",
            bars.iter()
                .map(|b| Some(f64::from(b.timestamp.weekday().num_days_from_monday()))),
        ));

        for series in signals {
            let (values, missing) = impute(&as_of_join(&bars, series));
            columns.push(column(&series.name, values.into_iter().map(Some)));
            columns.push(column(
                &format!("{}_missing", series.name),
                missing.into_iter().map(Some),
            ));
        }

        let targets: BTreeMap<Horizon, Vec<Option<f64>>> = Horizon::ALL
            .iter()
            .map(|h| (*h, lead_values(&close, h.bars_ahead())))
            .collect();

        let keep: Vec<usize> = (0..bars.len())
            .filter(|i| targets.values().all(|t| t[*i].is_some()))
            .collect();

        if keep.len() < self.min_clean_rows {
            return Err(FeatureError::InsufficientCleanRows {
                rows: keep.len(),
                required: self.min_clean_rows,
            });
        }

        Ok(FeatureTable {
            ticker: ticker.to_string(),
            timestamps: keep.iter().map(|i| bars[*i].timestamp).collect(),
            features: columns
                .into_iter()
                .map(|c| FeatureColumn {
                    values: keep.iter().map(|i| c.values[*i]).collect(),
                    name: c.name,
                })
                .collect(),
            targets: targets
                .into_iter()
                .map(|(h, values)| (h, keep.iter().filter_map(|i| values[*i]).collect()))
                .collect(),
        })
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn column(name: &str, values: impl Iterator<Item = Option<f64>>) -> FeatureColumn {
    FeatureColumn {
        name: name.to_string(),
        values: values.collect(),
    }
}

fn lag_values(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| i.checked_sub(lag).map(|j| values[j]))
        .collect()
}

fn lead_values(values: &[f64], lead: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| values.get(i + lead).copied().filter(|v| v.is_finite()))
        .collect()
}

/// Latest reading at or before each bar. Readings must be sorted by timestamp.
fn as_of_join(bars: &[Bar], series: &SignalSeries) -> Vec<Option<f64>> {
    let mut next = 0;
    let mut latest = None;
    bars.iter()
        .map(|bar| {
            while let Some(reading) = series.readings.get(next) {
                if reading.timestamp > bar.timestamp {
                    break;
                }
                latest = Some(reading.value).filter(|v| v.is_finite());
                next += 1;
            }
            latest
        })
        .collect()
}

/// Fills gaps with the median of present values and returns the 0/1 missing flags.
fn impute(values: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    let fill = median(values.iter().flatten().copied().collect()).unwrap_or(0.0);
    values
        .iter()
        .map(|v| match v {
            Some(v) => (*v, 0.0),
            None => (fill, 1.0),
        })
        .unzip()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use qbot_core::SignalReading;
    use rust_decimal_macros::dec;

    // Monday 2024-01-01 09:30 UTC
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = dec!(100) + Decimal::from(i);
                Bar {
                    timestamp: t0() + Duration::minutes(15 * i as i64),
                    open: close - dec!(0.5),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(1000),
                }
            })
            .collect()
    }

    fn values(table: &FeatureTable, name: &str) -> Vec<Option<f64>> {
        table.feature(name).unwrap().values.clone()
    }

    #[test]
    fn test_column_layout_and_trailing_rows_dropped() {
        let table = FeatureBuilder::new(100)
            .build("AAPL", bars(120), &[SignalSeries::missing("grok_sentiment")])
            .unwrap();

        assert_eq!(table.len(), 116);
        assert_eq!(
            table.feature_names(),
            vec![
                "open",
                "high",
                "low",
                "close",
                "volume",
                "prev_close",
                "prev_close_5",
                "prev_close_15",
                "price_change",
                "price_change_5",
                "price_change_15",
                "volatility",
                "hour",
                "day_of_week",
                "grok_sentiment",
                "grok_sentiment_missing",
            ]
        );
        for horizon in Horizon::ALL {
            assert_eq!(table.target(horizon).len(), 116);
        }
        assert_eq!(table.target(Horizon::Min15)[0], 101.0);
        assert_eq!(table.target(Horizon::Min30)[0], 102.0);
        assert_eq!(table.target(Horizon::Min60)[0], 104.0);
    }

    #[test]
    fn test_lags_missing_at_window_start() {
        let table = FeatureBuilder::new(100).build("AAPL", bars(120), &[]).unwrap();

        let prev_5 = values(&table, "prev_close_5");
        assert!(prev_5[..5].iter().all(Option::is_none));
        assert_eq!(prev_5[5], Some(100.0));
        assert_eq!(values(&table, "price_change_15")[15], Some(15.0));
        assert_eq!(values(&table, "price_change")[0], None);
    }

    #[test]
    fn test_time_and_volatility_features() {
        let table = FeatureBuilder::new(100).build("AAPL", bars(120), &[]).unwrap();

        assert_eq!(values(&table, "hour")[0], Some(9.0));
        assert_eq!(values(&table, "day_of_week")[0], Some(0.0));
        assert_eq!(values(&table, "volatility")[0], Some(0.02));
    }

    #[test]
    fn test_insufficient_clean_rows() {
        let err = FeatureBuilder::new(100)
            .build("AAPL", bars(103), &[])
            .unwrap_err();
        assert_eq!(
            err,
            FeatureError::InsufficientCleanRows {
                rows: 99,
                required: 100
            }
        );
        assert_eq!(err.to_string(), "Only 99 clean rows");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            FeatureBuilder::new(100).build("AAPL", Vec::new(), &[]),
            Err(FeatureError::EmptyInput)
        );
    }

    #[test]
    fn test_point_in_time_join_never_looks_ahead() {
        let readings = vec![
            SignalReading {
                timestamp: t0() - Duration::days(1),
                value: 0.1,
            },
            SignalReading {
                timestamp: t0() + Duration::minutes(20),
                value: 0.7,
            },
        ];
        let table = FeatureBuilder::new(100)
            .build("AAPL", bars(120), &[SignalSeries::new("sentiment", readings)])
            .unwrap();

        let sentiment = values(&table, "sentiment");
        assert_eq!(sentiment[0], Some(0.1));
        assert_eq!(sentiment[1], Some(0.1));
        assert_eq!(sentiment[2], Some(0.7));
        assert!(values(&table, "sentiment_missing")
            .iter()
            .all(|v| *v == Some(0.0)));
    }

    #[test]
    fn test_missing_signal_imputed_with_median() {
        // First reading lands on bar 10; bars 0-9 have nothing as of their time.
        let readings = [2.0, 4.0, 9.0]
            .iter()
            .enumerate()
            .map(|(i, v)| SignalReading {
                timestamp: t0() + Duration::minutes(15 * (10 + i as i64)),
                value: *v,
            })
            .collect();
        let table = FeatureBuilder::new(100)
            .build("AAPL", bars(120), &[SignalSeries::new("gain", readings)])
            .unwrap();

        let gain = values(&table, "gain");
        let missing = values(&table, "gain_missing");
        // Present values: 2.0, 4.0, then 9.0 carried for the rest.
        assert!(gain[..10].iter().all(|v| *v == Some(9.0)));
        assert_eq!(gain[10], Some(2.0));
        assert!(missing[..10].iter().all(|v| *v == Some(1.0)));
        assert!(missing[10..].iter().all(|v| *v == Some(0.0)));
    }

    #[test]
    fn test_signal_without_readings_fills_zero() {
        let table = FeatureBuilder::new(100)
            .build("AAPL", bars(120), &[SignalSeries::missing("gain")])
            .unwrap();
        assert!(values(&table, "gain").iter().all(|v| *v == Some(0.0)));
        assert!(values(&table, "gain_missing").iter().all(|v| *v == Some(1.0)));
    }

    #[test]
    fn test_unsorted_bars_are_ordered() {
        let mut input = bars(120);
        input.reverse();
        let table = FeatureBuilder::new(100).build("AAPL", input, &[]).unwrap();
        assert_eq!(table.timestamps[0], t0());
        assert_eq!(values(&table, "close")[0], Some(100.0));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(Vec::new()), None);
    }
}
