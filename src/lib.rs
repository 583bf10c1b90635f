mod caption;
mod classify;
mod config;
mod error;
mod snapshot_cache;
mod tiempo;
mod types;
mod weather_data;

pub use error::TiempoError;
pub use tiempo::*;

pub use caption::{CaptionError, Captioner, SnapshotSummary, FALLBACK_CAPTION};
pub use classify::{classify_rain, classify_risk, describe_rain, describe_risk};
pub use config::{ConfigError, RainThresholds, RiskThresholds, TiempoConfig};
pub use snapshot_cache::{CacheState, SnapshotCache};

pub use types::risk::*;
pub use types::snapshot::*;
pub use types::weather_data::daily::DailyEntry;
pub use types::weather_data::hourly::HourlyEntry;
pub use types::weather_data::totals::CurrentTotals;

pub use weather_data::error::{
    FetchError, ParseError, PartialParseError, PartialParseKind, RefreshError,
};
pub use weather_data::fetcher::{ImnFetcher, PageSource};
pub use weather_data::table_parser::{Column, SectionKind};
