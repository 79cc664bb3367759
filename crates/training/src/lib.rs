//! Sequential multi-horizon model training.
//!
//! The [`Orchestrator`] walks the selected tickers one at a time, gates each on
//! data availability, builds its feature table, and fits one model per
//! horizon through a [`ModelFitter`](qbot_core::ModelFitter). Progress is
//! persisted after every step through the [`StatusTracker`].

pub mod availability;
pub mod features;
pub mod fitter;
pub mod metrics;
pub mod orchestrator;
pub mod tracker;
pub mod worker;

pub use availability::{Availability, DataAvailabilityChecker};
pub use features::{FeatureBuilder, FeatureError};
pub use fitter::ExternalProcessFitter;
pub use metrics::{Metrics, MetricsError};
pub use orchestrator::{Collaborators, Orchestrator};
pub use tracker::StatusTracker;
pub use worker::TrainingWorker;
