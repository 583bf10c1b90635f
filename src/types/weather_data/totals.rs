use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// The page's accumulated-rain summary block.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct CurrentTotals {
    pub fecha: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub sum_lluv_mm: Option<f64>,  // accumulated since 07:00 local
    pub lluv_ayer_mm: Option<f64>, // previous day's 24h total
}

impl CurrentTotals {
    /// The larger of the two accumulations, ignoring absent values.
    pub fn peak_mm(&self) -> Option<f64> {
        match (self.sum_lluv_mm, self.lluv_ayer_mm) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}
