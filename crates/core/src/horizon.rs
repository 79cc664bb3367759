use serde::{Deserialize, Serialize};
use std::fmt;

/// Forecast distance trained for every ticker.
///
/// Serialized as the minute count so status documents read `"15"`, `"30"`, `"60"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Horizon {
    Min15,
    Min30,
    Min60,
}

impl Horizon {
    pub const ALL: [Self; 3] = [Self::Min15, Self::Min30, Self::Min60];

    #[must_use]
    pub const fn minutes(self) -> u32 {
        match self {
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Min60 => 60,
        }
    }

    /// Number of bars the target is shifted forward at native (15 minute) granularity.
    #[must_use]
    pub const fn bars_ahead(self) -> usize {
        match self {
            Self::Min15 => 1,
            Self::Min30 => 2,
            Self::Min60 => 4,
        }
    }

    #[must_use]
    pub const fn target_column(self) -> &'static str {
        match self {
            Self::Min15 => "target_15",
            Self::Min30 => "target_30",
            Self::Min60 => "target_60",
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.minutes())
    }
}

impl From<Horizon> for u32 {
    fn from(horizon: Horizon) -> Self {
        horizon.minutes()
    }
}

impl TryFrom<u32> for Horizon {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            15 => Ok(Self::Min15),
            30 => Ok(Self::Min30),
            60 => Ok(Self::Min60),
            other => Err(format!("unsupported horizon: {other} minutes")),
        }
    }
}
