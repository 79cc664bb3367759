use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qbot_core::Bar;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    /// Creates a new database client connected to the specified `PostgreSQL` database.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to market database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One row of the `market_data` hypertable.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketDataRecord {
    pub ticker: String,
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl From<MarketDataRecord> for Bar {
    fn from(record: MarketDataRecord) -> Self {
        Self {
            timestamp: record.time,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        }
    }
}
