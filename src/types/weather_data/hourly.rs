use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// One row of the page's hourly table.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct HourlyEntry {
    pub fecha: String,                         // label as published, e.g. "14/03 13:00"
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(rename = "timestampISO")]
    pub timestamp_iso: Option<String>,         // always set together with `timestamp`
    pub lluvia_mm: Option<f64>,                // rain in the hour
    pub temp_c: Option<f64>,
    pub hr_pct: Option<f64>,                   // relative humidity
}

impl HourlyEntry {
    /// True when the row carries no measurement at all.
    pub fn is_blank(&self) -> bool {
        self.lluvia_mm.is_none() && self.temp_c.is_none() && self.hr_pct.is_none()
    }
}
