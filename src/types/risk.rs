//! Discrete levels the classifier assigns to rainfall readings.

use serde::Serialize;
use std::fmt;

/// Flood-risk level derived from accumulated rainfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskStatus {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskStatus::Green => "green",
            RiskStatus::Yellow => "yellow",
            RiskStatus::Red => "red",
        };
        f.write_str(s)
    }
}

/// Intensity of a single hourly rainfall reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RainStatus {
    /// "sin lluvia"
    None,
    /// "ligera"
    Light,
    /// "moderada"
    Moderate,
    /// "intensa"
    Intense,
}

impl RainStatus {
    /// The label the institute uses for this intensity.
    pub fn label(self) -> &'static str {
        match self {
            RainStatus::None => "sin lluvia",
            RainStatus::Light => "ligera",
            RainStatus::Moderate => "moderada",
            RainStatus::Intense => "intensa",
        }
    }
}

impl fmt::Display for RainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the presentation layer shows for the risk level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskDescriptor {
    pub level: RiskStatus,
    pub label: String,
    pub emoji: String,
    /// False when no accumulated-rain figure was available to classify.
    pub data_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RainDescriptor {
    pub status: RainStatus,
    pub label: String,
}
