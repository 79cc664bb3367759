//! Redis-backed run state.
//!
//! Keys (configurable through [`RedisConfig`]):
//! - `training:status`  run record JSON, `SET .. EX ttl` on every write
//! - `training:lock`    owning run id, `SET .. NX EX ttl`, compare-and-delete on release
//! - `training:command` pending start signal, consumed with `GETDEL`
//! - `training:history` list of run summaries, newest first

use anyhow::{Context, Result};
use async_trait::async_trait;
use qbot_core::{RedisConfig, Run, RunSummary, StartSignal, StatusStore};
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::warn;

const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const REFRESH_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
";

#[derive(Clone)]
pub struct RedisStatusStore {
    conn: MultiplexedConnection,
    config: RedisConfig,
}

impl RedisStatusStore {
    /// Opens a multiplexed connection to the configured Redis instance.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let conn = connect(&config.url).await?;
        Ok(Self::new(conn, config))
    }

    #[must_use]
    pub fn new(conn: MultiplexedConnection, config: RedisConfig) -> Self {
        Self { conn, config }
    }
}

/// Opens a multiplexed tokio connection.
///
/// # Errors
/// Returns an error if the URL is invalid or the connection fails.
pub async fn connect(url: &str) -> Result<MultiplexedConnection> {
    let client = redis::Client::open(url).context("Invalid Redis URL")?;
    client
        .get_multiplexed_tokio_connection()
        .await
        .context("Failed to connect to Redis")
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn load_run(&self) -> Result<Option<Run>> {
        let data: Option<String> = redis::cmd("GET")
            .arg(&self.config.status_key)
            .query_async(&mut self.conn.clone())
            .await
            .context("Failed to read run status")?;

        data.map(|json| Run::from_json(&json).context("Stored run status is not a valid record"))
            .transpose()
    }

    async fn save_run(&self, run: &Run, ttl: Duration) -> Result<()> {
        let json = run.to_json()?;
        redis::cmd("SET")
            .arg(&self.config.status_key)
            .arg(json)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut self.conn.clone())
            .await
            .context("Failed to write run status")?;
        Ok(())
    }

    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.config.lock_key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut self.conn.clone())
            .await
            .context("Failed to acquire run lock")?;
        Ok(reply.is_some())
    }

    async fn refresh_lock(&self, owner: &str, ttl: Duration) -> Result<()> {
        let refreshed: i64 = redis::Script::new(REFRESH_LOCK_SCRIPT)
            .key(&self.config.lock_key)
            .arg(owner)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut self.conn.clone())
            .await
            .context("Failed to refresh run lock")?;

        if refreshed == 0 {
            warn!("Run lock {} is no longer held by {}", self.config.lock_key, owner);
        }
        Ok(())
    }

    async fn release_lock(&self, owner: &str) -> Result<()> {
        let _: i64 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(&self.config.lock_key)
            .arg(owner)
            .invoke_async(&mut self.conn.clone())
            .await
            .context("Failed to release run lock")?;
        Ok(())
    }

    async fn put_start_signal(&self, signal: &StartSignal, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(signal)?;
        redis::cmd("SET")
            .arg(&self.config.command_key)
            .arg(json)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut self.conn.clone())
            .await
            .context("Failed to write start signal")?;
        Ok(())
    }

    async fn take_start_signal(&self) -> Result<Option<StartSignal>> {
        let data: Option<String> = redis::cmd("GETDEL")
            .arg(&self.config.command_key)
            .query_async(&mut self.conn.clone())
            .await
            .context("Failed to read start signal")?;

        data.map(|json| serde_json::from_str(&json).context("Malformed start signal"))
            .transpose()
    }

    async fn push_history(&self, summary: &RunSummary, keep: usize) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        let last = isize::try_from(keep.max(1)).unwrap_or(isize::MAX) - 1;
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&self.config.history_key)
            .arg(json)
            .ignore()
            .cmd("LTRIM")
            .arg(&self.config.history_key)
            .arg(0)
            .arg(last)
            .ignore()
            .query_async::<_, ()>(&mut self.conn.clone())
            .await
            .context("Failed to record run history")?;
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<Vec<RunSummary>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let last = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.config.history_key)
            .arg(0)
            .arg(last)
            .query_async(&mut self.conn.clone())
            .await
            .context("Failed to read run history")?;

        Ok(entries
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Skipping malformed history entry: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn history_len(&self) -> Result<usize> {
        let len: usize = redis::cmd("LLEN")
            .arg(&self.config.history_key)
            .query_async(&mut self.conn.clone())
            .await
            .context("Failed to read run history length")?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_never_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(3600)), 3600);
    }

    async fn live_store() -> RedisStatusStore {
        let url = std::env::var("QBOT_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        let suffix = format!(
            "{}:{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let config = RedisConfig {
            url,
            status_key: format!("test:status:{suffix}"),
            lock_key: format!("test:lock:{suffix}"),
            command_key: format!("test:command:{suffix}"),
            history_key: format!("test:history:{suffix}"),
            ..RedisConfig::default()
        };
        RedisStatusStore::connect(config).await.unwrap()
    }

    async fn lock_ttl(store: &RedisStatusStore) -> i64 {
        redis::cmd("TTL")
            .arg(&store.config.lock_key)
            .query_async(&mut store.conn.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_lock_owner_checks_against_redis() {
        let store = live_store().await;
        let ttl = Duration::from_secs(30);

        assert!(store.try_lock("run-a", ttl).await.unwrap());
        assert!(!store.try_lock("run-b", ttl).await.unwrap());

        store.refresh_lock("run-b", Duration::from_secs(600)).await.unwrap();
        assert!(lock_ttl(&store).await <= 30);
        store.refresh_lock("run-a", Duration::from_secs(600)).await.unwrap();
        assert!(lock_ttl(&store).await > 30);

        store.release_lock("run-b").await.unwrap();
        assert!(!store.try_lock("run-b", ttl).await.unwrap());

        store.release_lock("run-a").await.unwrap();
        assert!(store.try_lock("run-b", ttl).await.unwrap());
        store.release_lock("run-b").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_start_signal_and_history_against_redis() {
        let store = live_store().await;

        let signal = StartSignal::new(Some(vec!["AAPL".to_string()]), "test");
        store
            .put_start_signal(&signal, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.take_start_signal().await.unwrap(), Some(signal));
        assert_eq!(store.take_start_signal().await.unwrap(), None);

        for i in 0..4 {
            let mut summary = Run::idle().summary();
            summary.total_tickers = i;
            store.push_history(&summary, 3).await.unwrap();
        }
        assert_eq!(store.history_len().await.unwrap(), 3);
        assert_eq!(store.history(1).await.unwrap()[0].total_tickers, 3);

        let _: () = redis::cmd("DEL")
            .arg(&store.config.history_key)
            .query_async(&mut store.conn.clone())
            .await
            .unwrap();
    }
}
