use crate::classify::{describe_rain, describe_risk};
use crate::config::TiempoConfig;
use crate::types::risk::{RainDescriptor, RiskDescriptor};
use crate::types::weather_data::daily::DailyEntry;
use crate::types::weather_data::hourly::HourlyEntry;
use crate::types::weather_data::totals::CurrentTotals;
use crate::weather_data::error::{PartialParseError, RefreshError};
use crate::weather_data::normalizer::normalize;
use crate::weather_data::table_parser::parse_sections;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One fully parsed and classified read of the station page.
///
/// Never mutated after construction; the cache hands out `Arc<Snapshot>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub hourly: Vec<HourlyEntry>,
    pub current: Option<CurrentTotals>,
    pub daily: Vec<DailyEntry>,
    pub risk: RiskDescriptor,
    /// Intensity of the most recent hourly reading.
    pub rain: RainDescriptor,
    pub diagnostics: Vec<PartialParseError>,
    pub computed_at: DateTime<Utc>,
}

impl Snapshot {
    /// Runs parse, normalize and classify over one page body.
    ///
    /// `now` is the moment the page was fetched; the page's dates are read
    /// relative to it in the institute's local time.
    pub fn from_html(
        html: &str,
        config: &TiempoConfig,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, RefreshError> {
        let offset = config.utc_offset()?;
        let sections = parse_sections(html)?;
        let normalized = normalize(&sections, now.with_timezone(&offset));

        let risk = describe_risk(normalized.current.as_ref(), &config.risk);
        let latest = normalized.hourly.iter().rev().find(|h| !h.is_blank());
        let rain = describe_rain(latest.and_then(|h| h.lluvia_mm), &config.rain);

        Ok(Snapshot {
            hourly: normalized.hourly,
            current: normalized.current,
            daily: normalized.daily,
            risk,
            rain,
            diagnostics: normalized.diagnostics,
            computed_at: now,
        })
    }

    pub fn latest_hourly(&self) -> Option<&HourlyEntry> {
        self.hourly.iter().rev().find(|h| !h.is_blank())
    }
}

/// `Cache-Control` hint for whatever HTTP layer fronts the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    /// Good data; cacheable for what is left of its TTL.
    Fresh { max_age: Duration },
    /// Fallback data; downstream caches must not keep it.
    Stale,
}

impl CacheDirective {
    pub fn header_value(&self) -> String {
        match self {
            CacheDirective::Fresh { max_age } => format!("public, max-age={}", max_age.as_secs()),
            CacheDirective::Stale => "no-cache, max-age=0, must-revalidate".to_string(),
        }
    }
}

/// What a snapshot request yields.
#[derive(Debug, Clone)]
pub struct SnapshotResponse {
    pub snapshot: Arc<Snapshot>,
    /// Set when the refresh failed and an older snapshot is being served.
    pub stale: bool,
    /// Why the last refresh failed. Also set on a failed explicit refresh
    /// while the cached snapshot is still fresh.
    pub refresh_error: Option<Arc<RefreshError>>,
    pub directive: CacheDirective,
}

impl SnapshotResponse {
    pub fn cache_control(&self) -> String {
        self.directive.header_value()
    }
}
