//! Runtime configuration: where to fetch from, how long to cache, and the
//! rainfall thresholds behind the classifier.
//!
//! Thresholds have no built-in values. They must come from the operator,
//! either through [`TiempoConfig::builder`] or a JSON file.

use bon::Builder;
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
/// The institute publishes in Costa Rica time, UTC-6 all year.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Risk thresholds must be finite, non-negative and ascending (low {low_mm}, high {high_mm})")]
    RiskThresholds { low_mm: f64, high_mm: f64 },

    #[error("Rain thresholds must be finite, positive and ascending (light {light_mm}, moderate {moderate_mm}, intense {intense_mm})")]
    RainThresholds {
        light_mm: f64,
        moderate_mm: f64,
        intense_mm: f64,
    },

    #[error("UTC offset of {0} hours is out of range")]
    UtcOffset(i32),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Upstream URL must not be empty")]
    EmptyUrl,

    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode config JSON")]
    Decode(#[from] serde_json::Error),
}

/// Accumulated-rain bounds separating green/yellow and yellow/red.
///
/// Each bound is the inclusive lower edge of the higher level.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawRiskThresholds")]
pub struct RiskThresholds {
    low_mm: f64,
    high_mm: f64,
}

#[derive(Deserialize)]
struct RawRiskThresholds {
    low_mm: f64,
    high_mm: f64,
}

impl TryFrom<RawRiskThresholds> for RiskThresholds {
    type Error = ConfigError;

    fn try_from(raw: RawRiskThresholds) -> Result<Self, Self::Error> {
        RiskThresholds::new(raw.low_mm, raw.high_mm)
    }
}

impl RiskThresholds {
    pub fn new(low_mm: f64, high_mm: f64) -> Result<Self, ConfigError> {
        let valid = low_mm.is_finite() && high_mm.is_finite() && low_mm >= 0.0 && low_mm < high_mm;
        if !valid {
            return Err(ConfigError::RiskThresholds { low_mm, high_mm });
        }
        Ok(Self { low_mm, high_mm })
    }

    pub fn low_mm(&self) -> f64 {
        self.low_mm
    }

    pub fn high_mm(&self) -> f64 {
        self.high_mm
    }
}

/// Hourly-rain bounds for the light/moderate/intense buckets.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawRainThresholds")]
pub struct RainThresholds {
    light_mm: f64,
    moderate_mm: f64,
    intense_mm: f64,
}

#[derive(Deserialize)]
struct RawRainThresholds {
    light_mm: f64,
    moderate_mm: f64,
    intense_mm: f64,
}

impl TryFrom<RawRainThresholds> for RainThresholds {
    type Error = ConfigError;

    fn try_from(raw: RawRainThresholds) -> Result<Self, Self::Error> {
        RainThresholds::new(raw.light_mm, raw.moderate_mm, raw.intense_mm)
    }
}

impl RainThresholds {
    pub fn new(light_mm: f64, moderate_mm: f64, intense_mm: f64) -> Result<Self, ConfigError> {
        let finite = [light_mm, moderate_mm, intense_mm]
            .iter()
            .all(|v| v.is_finite());
        if !finite || light_mm <= 0.0 || light_mm >= moderate_mm || moderate_mm >= intense_mm {
            return Err(ConfigError::RainThresholds {
                light_mm,
                moderate_mm,
                intense_mm,
            });
        }
        Ok(Self {
            light_mm,
            moderate_mm,
            intense_mm,
        })
    }

    pub fn light_mm(&self) -> f64 {
        self.light_mm
    }

    pub fn moderate_mm(&self) -> f64 {
        self.moderate_mm
    }

    pub fn intense_mm(&self) -> f64 {
        self.intense_mm
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_utc_offset_hours() -> i32 {
    DEFAULT_UTC_OFFSET_HOURS
}

/// Everything a [`crate::Tiempo`] needs to run.
///
/// # Examples
///
/// ```
/// use tiempo::{RainThresholds, RiskThresholds, TiempoConfig};
///
/// # fn main() -> Result<(), tiempo::ConfigError> {
/// let config = TiempoConfig::builder()
///     .url("https://example.org/estacion.html")
///     .risk(RiskThresholds::new(20.0, 60.0)?)
///     .rain(RainThresholds::new(0.5, 4.0, 15.0)?)
///     .build();
/// assert_eq!(config.ttl().as_secs(), 300);
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Builder, Deserialize)]
pub struct TiempoConfig {
    #[builder(into)]
    pub url: String,

    #[builder(default = DEFAULT_TTL_SECS)]
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[builder(default = DEFAULT_FETCH_TIMEOUT_SECS)]
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[builder(default = DEFAULT_UTC_OFFSET_HOURS)]
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    pub risk: RiskThresholds,
    pub rain: RainThresholds,
}

impl TiempoConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TiempoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_json_str(&json)
    }

    /// Checks the parts the type system does not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("ttl_secs"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("fetch_timeout_secs"));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::UtcOffset(self.utc_offset_hours))
    }
}
