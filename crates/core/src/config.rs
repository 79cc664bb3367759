use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub training: TrainingConfig,
    pub fitter: FitterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://postgres@localhost:5432/qbot".to_string(),
            max_connections: 10,
        }
    }
}

/// Redis keys used by the status tracker, the start trigger and the candidate sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub status_key: String,
    pub lock_key: String,
    pub command_key: String,
    pub history_key: String,
    pub positions_key: String,
    pub candidates_key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            status_key: "training:status".to_string(),
            lock_key: "training:lock".to_string(),
            command_key: "training:command".to_string(),
            history_key: "training:history".to_string(),
            positions_key: "portfolio_positions".to_string(),
            candidates_key: "grok:top_stocks".to_string(),
        }
    }
}

/// Tunables for a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum bars inside the availability window for a ticker to be trained.
    pub min_rows: i64,
    /// Short window used by the availability gate. Independent of `lookback_days`.
    pub availability_window_days: i64,
    /// History loaded for feature building.
    pub lookback_days: i64,
    pub min_clean_rows: usize,
    pub time_budget_secs: u64,
    /// Extra time granted to the fitter before the call is abandoned.
    pub fit_grace_secs: u64,
    pub status_ttl_secs: u64,
    pub start_signal_ttl_secs: u64,
    pub max_error_log: usize,
    pub history_len: usize,
    pub models_dir: String,
    pub poll_interval_secs: u64,
    /// Cron expression publishing a start signal, e.g. `0 0 6 * * Mon-Fri`.
    pub schedule: Option<String>,
    pub side_signals: Vec<SideSignalConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: 150,
            availability_window_days: 14,
            lookback_days: 30,
            min_clean_rows: 100,
            time_budget_secs: 160,
            fit_grace_secs: 30,
            status_ttl_secs: 3600,
            start_signal_ttl_secs: 300,
            max_error_log: 1000,
            history_len: 50,
            models_dir: "/app/models".to_string(),
            poll_interval_secs: 5,
            schedule: None,
            side_signals: vec![
                SideSignalConfig {
                    name: "grok_sentiment".to_string(),
                    table: "grok_deepersearch".to_string(),
                    column: "sentiment".to_string(),
                },
                SideSignalConfig {
                    name: "grok_expected_gain".to_string(),
                    table: "grok_topstocks".to_string(),
                    column: "expected_gain".to_string(),
                },
            ],
        }
    }
}

/// A point-in-time side signal read from `table.column`, exposed as feature `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideSignalConfig {
    pub name: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "qbot_fitter".to_string()],
        }
    }
}
