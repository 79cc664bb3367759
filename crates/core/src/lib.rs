pub mod candles;
pub mod config;
pub mod config_loader;
pub mod horizon;
pub mod market;
pub mod run;
pub mod start;
pub mod table;
pub mod traits;

pub use candles::{
    clamp_limit, normalize_symbol, parse_timeframes, parse_timestamp, Candle, CandleError,
    CandleQuery, LatestQuote, Timeframe,
};
pub use config::{
    AppConfig, DatabaseConfig, FitterConfig, RedisConfig, ServerConfig, SideSignalConfig,
    TrainingConfig,
};
pub use config_loader::ConfigLoader;
pub use horizon::Horizon;
pub use market::{Bar, SignalReading, SignalSeries};
pub use run::{
    ModelResult, RecordError, Run, RunStatus, RunSummary, TickerResult, TickerStatus,
    RUN_RECORD_VERSION,
};
pub use start::{is_valid_ticker, normalize_tickers, StartOutcome, StartRejection, StartSignal};
pub use table::{FeatureColumn, FeatureTable};
pub use traits::{
    ArtifactRef, BarSource, CandidateSource, CandleSource, FittedModel, ModelFitter,
    SideSignalSource, StatusStore,
};
