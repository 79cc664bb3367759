//! Side-signal repository.
//!
//! Reads one numeric column of a per-ticker signal table (sentiment,
//! expected gain, ...) for point-in-time joins against bars.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qbot_core::{SideSignalConfig, SideSignalSource, SignalReading};
use sqlx::PgPool;

/// Repository for a configured side-signal column.
#[derive(Debug, Clone)]
pub struct SideSignalRepository {
    pool: PgPool,
    config: SideSignalConfig,
}

impl SideSignalRepository {
    /// Creates a repository for `config.table.config.column`.
    ///
    /// # Errors
    /// Returns an error if the table or column name is not a plain SQL identifier.
    pub fn new(pool: PgPool, config: SideSignalConfig) -> Result<Self> {
        for identifier in [&config.table, &config.column] {
            if !is_identifier(identifier) {
                bail!("Invalid side signal identifier: {identifier:?}");
            }
        }
        Ok(Self { pool, config })
    }

    fn readings_query(&self) -> String {
        // Identifiers are validated in `new`; table names can't be bound as parameters.
        format!(
            r#"
            SELECT time, value FROM (
                (SELECT time, {column}::float8 AS value
                 FROM {table}
                 WHERE ticker = $1 AND time < $2 AND {column} IS NOT NULL
                 ORDER BY time DESC
                 LIMIT 1)
                UNION ALL
                (SELECT time, {column}::float8 AS value
                 FROM {table}
                 WHERE ticker = $1 AND time >= $2 AND time <= $3 AND {column} IS NOT NULL)
            ) readings
            ORDER BY time ASC
            "#,
            table = self.config.table,
            column = self.config.column,
        )
    }
}

#[async_trait]
impl SideSignalSource for SideSignalRepository {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn readings(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SignalReading>> {
        let rows: Vec<(DateTime<Utc>, f64)> = sqlx::query_as(&self.readings_query())
            .bind(ticker)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query side signal {}", self.config.name))?;

        Ok(rows
            .into_iter()
            .map(|(timestamp, value)| SignalReading { timestamp, value })
            .collect())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_identifier("grok_deepersearch"));
        assert!(is_identifier("_col1"));
        assert!(!is_identifier("1col"));
        assert!(!is_identifier("grok; DROP TABLE market_data"));
        assert!(!is_identifier(""));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_name() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/qbot")
            .unwrap();
        let config = SideSignalConfig {
            name: "grok_sentiment".to_string(),
            table: "grok deepersearch".to_string(),
            column: "sentiment".to_string(),
        };
        assert!(SideSignalRepository::new(pool, config).is_err());
    }

    #[tokio::test]
    async fn test_query_seeds_latest_reading_before_window() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/qbot")
            .unwrap();
        let repo = SideSignalRepository::new(
            pool,
            SideSignalConfig {
                name: "grok_sentiment".to_string(),
                table: "grok_deepersearch".to_string(),
                column: "sentiment".to_string(),
            },
        )
        .unwrap();

        let query = repo.readings_query();
        assert!(query.contains("time < $2"));
        assert!(query.contains("LIMIT 1"));
        assert!(query.contains("FROM grok_deepersearch"));
        assert_eq!(repo.name(), "grok_sentiment");
    }
}
