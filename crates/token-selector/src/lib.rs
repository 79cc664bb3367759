//! Ticker selection for training runs.

pub mod selector;

pub use selector::TickerSelector;
