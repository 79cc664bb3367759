//! Builds the production collaborators from configuration.

use anyhow::{Context, Result};
use qbot_core::{AppConfig, CandleSource, SideSignalSource, StatusStore};
use qbot_data::{
    connect_redis, DatabaseClient, MarketDataRepository, ModelInventory, RedisCandidateSource,
    RedisStatusStore, Repositories,
};
use qbot_token_selector::TickerSelector;
use qbot_training::{Collaborators, ExternalProcessFitter, Orchestrator};
use std::sync::Arc;
use std::time::Duration;

pub async fn status_store(config: &AppConfig) -> Result<Arc<dyn StatusStore>> {
    let store = RedisStatusStore::connect(config.redis.clone()).await?;
    Ok(Arc::new(store))
}

#[must_use]
pub fn inventory(config: &AppConfig) -> ModelInventory {
    ModelInventory::new(&config.training.models_dir)
}

#[must_use]
pub fn signal_ttl(config: &AppConfig) -> Duration {
    Duration::from_secs(config.training.start_signal_ttl_secs)
}

pub async fn database(config: &AppConfig) -> Result<DatabaseClient> {
    DatabaseClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to market data database")
}

#[must_use]
pub fn candle_source(db: &DatabaseClient) -> Arc<dyn CandleSource> {
    Arc::new(MarketDataRepository::new(db.pool().clone()))
}

pub async fn orchestrator(
    config: &AppConfig,
    store: Arc<dyn StatusStore>,
    db: &DatabaseClient,
) -> Result<Orchestrator> {
    let repos = Repositories::new(db.pool().clone(), &config.training.side_signals)?;

    let conn = connect_redis(&config.redis.url).await?;
    let selector = TickerSelector::new(
        Arc::new(RedisCandidateSource::new(
            "positions",
            &config.redis.positions_key,
            conn.clone(),
        )),
        Arc::new(RedisCandidateSource::new(
            "recommendations",
            &config.redis.candidates_key,
            conn,
        )),
    );

    let side_signals = repos
        .side_signals
        .into_iter()
        .map(|repo| Arc::new(repo) as Arc<dyn SideSignalSource>)
        .collect();

    Ok(Orchestrator::new(
        config.training.clone(),
        Collaborators {
            selector,
            bars: Arc::new(repos.market_data),
            side_signals,
            fitter: Arc::new(ExternalProcessFitter::from_config(&config.fitter)),
            store,
            inventory: inventory(config),
        },
    ))
}
