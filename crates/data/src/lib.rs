//! Storage for the model training service.
//!
//! This crate provides:
//! - Database client and repositories for bars, chart candles and side signals in `PostgreSQL`/TimescaleDB
//! - Redis-backed run state, run lock, start signal and run history
//! - An in-process store with the same semantics, for tests and embedding
//! - Candidate ticker lists published into Redis
//! - The on-disk model inventory

pub mod candidates;
pub mod database;
pub mod inventory;
pub mod memory;
pub mod redis_store;
pub mod repositories;

pub use candidates::{parse_candidates, RedisCandidateSource};
pub use database::{DatabaseClient, MarketDataRecord};
pub use inventory::{
    parse_model_name, ModelEntry, ModelInventory, ModelListing, ModelStatistics,
    MODEL_DIR_PREFIX,
};
pub use memory::MemoryStatusStore;
pub use redis_store::{connect as connect_redis, RedisStatusStore};
pub use repositories::{CandleRecord, MarketDataRepository, Repositories, SideSignalRepository};
