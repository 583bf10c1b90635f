//! Pure rainfall classification.
//!
//! Every threshold is the inclusive lower bound of the higher bucket, so a
//! reading exactly on a threshold lands in the more severe level.

use crate::config::{RainThresholds, RiskThresholds};
use crate::types::risk::{RainDescriptor, RainStatus, RiskDescriptor, RiskStatus};
use crate::types::weather_data::totals::CurrentTotals;

const UNAVAILABLE_LABEL: &str = "Sin datos de lluvia acumulada";
const UNAVAILABLE_EMOJI: &str = "⚪";
const NO_READING_LABEL: &str = "sin datos";

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Classifies the larger of "accumulated since 7am" and "previous 24h".
///
/// With neither value present the result is [`RiskStatus::Green`]; use
/// [`describe_risk`] to tell that apart from a real green.
pub fn classify_risk(
    sum_lluv_mm: Option<f64>,
    lluv_ayer_mm: Option<f64>,
    thresholds: &RiskThresholds,
) -> RiskStatus {
    let peak = match (finite(sum_lluv_mm), finite(lluv_ayer_mm)) {
        (Some(a), Some(b)) => a.max(b),
        (Some(v), None) | (None, Some(v)) => v,
        (None, None) => return RiskStatus::Green,
    };
    if peak >= thresholds.high_mm() {
        RiskStatus::Red
    } else if peak >= thresholds.low_mm() {
        RiskStatus::Yellow
    } else {
        RiskStatus::Green
    }
}

pub fn describe_risk(current: Option<&CurrentTotals>, thresholds: &RiskThresholds) -> RiskDescriptor {
    let (sum, ayer) = current
        .map(|c| (finite(c.sum_lluv_mm), finite(c.lluv_ayer_mm)))
        .unwrap_or_default();
    if sum.is_none() && ayer.is_none() {
        return RiskDescriptor {
            level: RiskStatus::Green,
            label: UNAVAILABLE_LABEL.to_string(),
            emoji: UNAVAILABLE_EMOJI.to_string(),
            data_available: false,
        };
    }
    let level = classify_risk(sum, ayer, thresholds);
    let (label, emoji) = match level {
        RiskStatus::Green => ("Sin riesgo", "🟢"),
        RiskStatus::Yellow => ("Precaución", "🟡"),
        RiskStatus::Red => ("Alerta por lluvias", "🔴"),
    };
    RiskDescriptor {
        level,
        label: label.to_string(),
        emoji: emoji.to_string(),
        data_available: true,
    }
}

/// Buckets one hourly rainfall figure. An absent reading falls in
/// [`RainStatus::None`]; [`describe_rain`] labels it differently.
pub fn classify_rain(lluvia_mm: Option<f64>, thresholds: &RainThresholds) -> RainStatus {
    match finite(lluvia_mm) {
        Some(v) if v >= thresholds.intense_mm() => RainStatus::Intense,
        Some(v) if v >= thresholds.moderate_mm() => RainStatus::Moderate,
        Some(v) if v >= thresholds.light_mm() => RainStatus::Light,
        _ => RainStatus::None,
    }
}

pub fn describe_rain(lluvia_mm: Option<f64>, thresholds: &RainThresholds) -> RainDescriptor {
    let status = classify_rain(lluvia_mm, thresholds);
    let label = match finite(lluvia_mm) {
        Some(_) => status.label(),
        None => NO_READING_LABEL,
    };
    RainDescriptor {
        status,
        label: label.to_string(),
    }
}
