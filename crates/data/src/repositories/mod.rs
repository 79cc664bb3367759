//! Database repositories for training inputs.
//!
//! Each repository provides typed, read-only access to one table.

pub mod market_data_repo;
pub mod side_signal_repo;

pub use market_data_repo::{CandleRecord, MarketDataRepository};
pub use side_signal_repo::SideSignalRepository;

use anyhow::Result;
use qbot_core::SideSignalConfig;
use sqlx::PgPool;

/// Creates all repositories from a single database pool.
pub struct Repositories {
    pub market_data: MarketDataRepository,
    pub side_signals: Vec<SideSignalRepository>,
}

impl Repositories {
    /// Creates a new set of repositories from a database pool.
    ///
    /// # Errors
    /// Returns an error if a side-signal configuration names an invalid table or column.
    pub fn new(pool: PgPool, side_signals: &[SideSignalConfig]) -> Result<Self> {
        let side_signals = side_signals
            .iter()
            .map(|config| SideSignalRepository::new(pool.clone(), config.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            market_data: MarketDataRepository::new(pool),
            side_signals,
        })
    }
}
