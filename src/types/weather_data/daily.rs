use chrono::{DateTime, FixedOffset};
use serde::Serialize;

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct DailyEntry {
    pub fecha: String,
    pub timestamp: Option<DateTime<FixedOffset>>, // local midnight of the day
    pub lluvia_mm: Option<f64>,                   // 24h total
}
