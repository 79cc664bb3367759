use crate::horizon::Horizon;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A named feature column. `None` marks a missing cell (e.g. an unavailable lag).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Clean training rows for one ticker: features plus one target per horizon.
///
/// Every column and every target has exactly `len()` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub ticker: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub features: Vec<FeatureColumn>,
    pub targets: BTreeMap<Horizon, Vec<f64>>,
}

impl FeatureTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&FeatureColumn> {
        self.features.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|c| c.name.as_str()).collect()
    }

    /// True target values for a horizon; empty if the horizon was not built.
    #[must_use]
    pub fn target(&self, horizon: Horizon) -> &[f64] {
        self.targets.get(&horizon).map_or(&[], Vec::as_slice)
    }
}
