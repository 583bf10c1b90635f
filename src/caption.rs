//! Digest handed to the captioning collaborator.

use crate::types::risk::{RainStatus, RiskStatus};
use crate::types::snapshot::Snapshot;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

/// Used whenever no caption can be produced.
pub const FALLBACK_CAPTION: &str = "Hoy el tiempo no quiso posar para la foto.";

#[derive(Debug, Error)]
#[error("Caption generation failed: {0}")]
pub struct CaptionError(pub String);

/// Something that writes a one-line caption for a weather summary, such as
/// a language model behind an HTTP API.
pub trait Captioner: Send + Sync {
    fn caption<'a>(&'a self, summary: &'a SnapshotSummary) -> BoxFuture<'a, Result<String, CaptionError>>;
}

/// Compact, serializable view of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub risk: RiskStatus,
    pub risk_label: String,
    pub sum_lluv_mm: Option<f64>,
    pub lluv_ayer_mm: Option<f64>,
    pub fecha: Option<String>,
    pub temp_c: Option<f64>,
    pub hr_pct: Option<f64>,
    pub lluvia_mm: Option<f64>,
    pub rain: RainStatus,
    pub rain_label: String,
    pub stale: bool,
}

impl SnapshotSummary {
    pub fn new(snapshot: &Snapshot, stale: bool) -> Self {
        let latest = snapshot.latest_hourly();
        let current = snapshot.current.as_ref();
        SnapshotSummary {
            risk: snapshot.risk.level,
            risk_label: snapshot.risk.label.clone(),
            sum_lluv_mm: current.and_then(|c| c.sum_lluv_mm),
            lluv_ayer_mm: current.and_then(|c| c.lluv_ayer_mm),
            fecha: latest.map(|h| h.fecha.clone()),
            temp_c: latest.and_then(|h| h.temp_c),
            hr_pct: latest.and_then(|h| h.hr_pct),
            lluvia_mm: latest.and_then(|h| h.lluvia_mm),
            rain: snapshot.rain.status,
            rain_label: snapshot.rain.label.clone(),
            stale,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
