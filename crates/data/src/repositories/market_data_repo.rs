//! Market data repository.
//!
//! Read access to the `market_data` bar table used by the availability gate,
//! the feature loader and the chart endpoints. Candles at 15min, 1hour and
//! 1day come from the continuous aggregates; other widths are bucketed from
//! raw bars.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qbot_core::{Bar, BarSource, Candle, CandleQuery, CandleSource, LatestQuote, Timeframe};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::database::MarketDataRecord;

/// Repository for `market_data` bars.
#[derive(Debug, Clone)]
pub struct MarketDataRepository {
    pool: PgPool,
}

impl MarketDataRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Counts the bars for a ticker within a time range (inclusive).
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn count_records(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM market_data
            WHERE ticker = $1
              AND time >= $2 AND time <= $3
            "#,
        )
        .bind(ticker)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count market data")?;

        Ok(row.0)
    }

    /// Queries bars for a ticker within a time range, oldest first.
    ///
    /// Prices are cast to `numeric` so the table may store either numeric or
    /// double precision columns.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_by_time_range(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketDataRecord>> {
        let records = sqlx::query_as::<_, MarketDataRecord>(
            r#"
            SELECT ticker, time,
                   open::numeric AS open, high::numeric AS high, low::numeric AS low,
                   close::numeric AS close, volume::numeric AS volume
            FROM market_data
            WHERE ticker = $1
              AND time >= $2 AND time <= $3
            ORDER BY time ASC
            "#,
        )
        .bind(ticker)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query market data")?;

        Ok(records)
    }
}

impl MarketDataRepository {
    /// Most recent candles for the query, newest first as stored.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_candles(&self, query: &CandleQuery) -> Result<Vec<CandleRecord>> {
        let records = sqlx::query_as::<_, CandleRecord>(&candle_sql(query.timeframe))
            .bind(&query.ticker)
            .bind(query.start)
            .bind(query.end)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "Failed to query {} candles for {}",
                    query.timeframe, query.ticker
                )
            })?;

        Ok(records)
    }

    /// Newest bar for a ticker and the close immediately before it.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_latest(
        &self,
        ticker: &str,
    ) -> Result<Option<(MarketDataRecord, Option<Decimal>)>> {
        let latest = sqlx::query_as::<_, MarketDataRecord>(
            r#"
            SELECT ticker, time,
                   open::numeric AS open, high::numeric AS high, low::numeric AS low,
                   close::numeric AS close, volume::numeric AS volume
            FROM market_data
            WHERE ticker = $1
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query latest bar")?;

        let Some(latest) = latest else {
            return Ok(None);
        };

        let prev: Option<(Decimal,)> = sqlx::query_as(
            r#"
            SELECT close::numeric
            FROM market_data
            WHERE ticker = $1 AND time < $2
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(ticker)
        .bind(latest.time)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query previous close")?;

        Ok(Some((latest, prev.map(|(close,)| close))))
    }
}

/// One bucketed candle row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandleRecord {
    pub bucket: Option<DateTime<Utc>>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
}

/// Binds `$1` ticker, `$2` optional start, `$3` optional end, `$4` limit.
fn candle_sql(timeframe: Timeframe) -> String {
    match timeframe.aggregate_view() {
        Some(view) => format!(
            r#"
            SELECT bucket,
                   open::numeric AS open, high::numeric AS high, low::numeric AS low,
                   close::numeric AS close, volume::numeric AS volume
            FROM {view}
            WHERE ticker = $1
              AND ($2::timestamptz IS NULL OR bucket >= $2)
              AND ($3::timestamptz IS NULL OR bucket <= $3)
            ORDER BY bucket DESC
            LIMIT $4
            "#
        ),
        None => format!(
            r#"
            SELECT {bucket} AS bucket,
                   ((array_agg(open ORDER BY time))[1])::numeric AS open,
                   MAX(high)::numeric AS high,
                   MIN(low)::numeric AS low,
                   ((array_agg(close ORDER BY time DESC))[1])::numeric AS close,
                   SUM(volume)::numeric AS volume
            FROM market_data
            WHERE ticker = $1
              AND ($2::timestamptz IS NULL OR time >= $2)
              AND ($3::timestamptz IS NULL OR time <= $3)
            GROUP BY 1
            ORDER BY 1 DESC
            LIMIT $4
            "#,
            bucket = timeframe.bucket_expr()
        ),
    }
}

/// Oldest first; rows without a bucket are skipped.
fn into_candles(records: Vec<CandleRecord>) -> Vec<Candle> {
    records
        .into_iter()
        .rev()
        .filter_map(|r| {
            r.bucket
                .map(|time| Candle::new(time, r.open, r.high, r.low, r.close, r.volume))
        })
        .collect()
}

#[async_trait]
impl CandleSource for MarketDataRepository {
    async fn candles(&self, query: &CandleQuery) -> Result<Vec<Candle>> {
        Ok(into_candles(self.query_candles(query).await?))
    }

    async fn latest(&self, ticker: &str) -> Result<Option<LatestQuote>> {
        Ok(self
            .query_latest(ticker)
            .await?
            .map(|(record, prev_close)| {
                let symbol = record.ticker.clone();
                LatestQuote::from_bar(symbol, &Bar::from(record), prev_close)
            }))
    }
}

#[async_trait]
impl BarSource for MarketDataRepository {
    async fn count_bars(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        self.count_records(ticker, start, end).await
    }

    async fn load_bars(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let records = self.query_by_time_range(ticker, start, end).await?;
        Ok(records.into_iter().map(Bar::from).collect())
    }
}
