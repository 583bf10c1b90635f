//! Typed records from raw sections.
//!
//! Row problems never abort normalization: the offending field is left
//! absent and a [`PartialParseError`] is recorded instead.

use crate::types::weather_data::daily::DailyEntry;
use crate::types::weather_data::hourly::HourlyEntry;
use crate::types::weather_data::totals::CurrentTotals;
use crate::weather_data::error::{PartialParseError, PartialParseKind};
use crate::weather_data::table_parser::{Column, Section, SectionKind, Sections};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, SecondsFormat, TimeZone};
use log::debug;

const PLACEHOLDERS: [&str; 8] = ["-", "--", "—", "–", "nd", "n/d", "s/d", "sd"];

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Normalized {
    pub hourly: Vec<HourlyEntry>,
    pub current: Option<CurrentTotals>,
    pub daily: Vec<DailyEntry>,
    pub diagnostics: Vec<PartialParseError>,
}

/// Normalizes every known section.
///
/// `reference` is "now" in the institute's local time; it supplies the year
/// the page leaves out.
pub(crate) fn normalize(sections: &Sections, reference: DateTime<FixedOffset>) -> Normalized {
    let mut out = Normalized::default();

    if let Some(section) = sections.get(SectionKind::Hourly) {
        let mut rows = RowReader::new(section, SectionKind::Hourly, reference);
        for idx in 0..section.rows.len() {
            let fecha = rows.label(idx);
            let timestamp = rows.timestamp(idx, &fecha, true);
            let entry = HourlyEntry {
                timestamp_iso: timestamp.as_ref().map(iso),
                timestamp,
                fecha,
                lluvia_mm: rows.number(idx, Column::Lluvia),
                temp_c: rows.number(idx, Column::Temp),
                hr_pct: rows.number(idx, Column::Hr),
            };
            out.hourly.push(entry);
        }
        out.diagnostics.append(&mut rows.diagnostics);
    }

    out.current = match sections.get(SectionKind::Totals) {
        Some(section) if !section.rows.is_empty() => {
            let mut rows = RowReader::new(section, SectionKind::Totals, reference);
            let fecha = rows.label(0);
            let current = CurrentTotals {
                timestamp: rows.timestamp(0, &fecha, false),
                fecha,
                sum_lluv_mm: rows.number(0, Column::SumLluv),
                lluv_ayer_mm: rows.number(0, Column::LluvAyer),
            };
            out.diagnostics.append(&mut rows.diagnostics);
            Some(current)
        }
        _ => sections
            .get(SectionKind::Hourly)
            .and_then(|section| totals_from_hourly(section, &out.hourly, reference)),
    };

    if let Some(section) = sections.get(SectionKind::Daily) {
        let mut rows = RowReader::new(section, SectionKind::Daily, reference);
        for idx in 0..section.rows.len() {
            let fecha = rows.label(idx);
            out.daily.push(DailyEntry {
                timestamp: rows.timestamp(idx, &fecha, false),
                fecha,
                lluvia_mm: rows.number(idx, Column::Lluvia),
            });
        }
        out.diagnostics.append(&mut rows.diagnostics);
    }

    for diagnostic in &out.diagnostics {
        debug!("Partial parse: {}", diagnostic);
    }
    out
}

/// Some page layouts carry the accumulations as extra hourly columns.
fn totals_from_hourly(
    section: &Section,
    hourly: &[HourlyEntry],
    reference: DateTime<FixedOffset>,
) -> Option<CurrentTotals> {
    if !section.has(Column::SumLluv) && !section.has(Column::LluvAyer) {
        return None;
    }
    // Best effort: cell problems in these columns are not reported.
    let mut rows = RowReader::new(section, SectionKind::Hourly, reference);
    (0..section.rows.len()).rev().find_map(|idx| {
        let sum_lluv_mm = rows.number(idx, Column::SumLluv);
        let lluv_ayer_mm = rows.number(idx, Column::LluvAyer);
        (sum_lluv_mm.is_some() || lluv_ayer_mm.is_some()).then(|| CurrentTotals {
            fecha: hourly[idx].fecha.clone(),
            timestamp: hourly[idx].timestamp,
            sum_lluv_mm,
            lluv_ayer_mm,
        })
    })
}

struct RowReader<'a> {
    section: &'a Section,
    kind: SectionKind,
    reference: DateTime<FixedOffset>,
    diagnostics: Vec<PartialParseError>,
}

impl<'a> RowReader<'a> {
    fn new(section: &'a Section, kind: SectionKind, reference: DateTime<FixedOffset>) -> Self {
        Self {
            section,
            kind,
            reference,
            diagnostics: Vec::new(),
        }
    }

    fn cell(&self, idx: usize, column: Column) -> Option<Option<&'a str>> {
        let col = *self.section.columns.get(&column)?;
        Some(self.section.rows[idx].get(col).map(String::as_str))
    }

    fn report(&mut self, idx: usize, column: Column, raw: &str, kind: PartialParseKind) {
        self.diagnostics.push(PartialParseError {
            section: self.kind,
            row: idx,
            field: column,
            raw: raw.to_string(),
            kind,
        });
    }

    /// The row's date label, with the time appended when it sits in its own column.
    fn label(&self, idx: usize) -> String {
        let fecha = self.cell(idx, Column::Fecha).flatten().unwrap_or_default();
        match self.cell(idx, Column::Hora).flatten() {
            Some(hora) if !hora.is_empty() && !fecha.contains(':') => {
                format!("{fecha} {hora}").trim().to_string()
            }
            _ => fecha.to_string(),
        }
    }

    fn timestamp(
        &mut self,
        idx: usize,
        fecha: &str,
        require_time: bool,
    ) -> Option<DateTime<FixedOffset>> {
        // A totals block without a date column is normal.
        if !self.section.has(Column::Fecha) {
            return None;
        }
        let parsed = parse_fecha(fecha, self.reference, require_time);
        if parsed.is_none() {
            self.report(idx, Column::Fecha, fecha, PartialParseKind::BadTimestamp);
        }
        parsed
    }

    /// `None` when the column is missing, the cell is empty, or the value
    /// could not be read. Only the last two leave a diagnostic.
    fn number(&mut self, idx: usize, column: Column) -> Option<f64> {
        let raw = match self.cell(idx, column)? {
            Some(raw) => raw,
            None => {
                self.report(idx, column, "", PartialParseKind::MissingCell);
                return None;
            }
        };
        match parse_number(raw) {
            Ok(value) => value,
            Err(kind) => {
                self.report(idx, column, raw, kind);
                None
            }
        }
    }
}

pub(crate) fn iso(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Reads a locale-formatted number such as `2,3`, `1.234,5`, `24.5 °C` or `88 %`.
///
/// `Ok(None)` for an empty cell.
pub(crate) fn parse_number(raw: &str) -> Result<Option<f64>, PartialParseKind> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str()) {
        return Err(PartialParseKind::Placeholder);
    }
    let digits = trimmed
        .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace() || c == '%' || c == '°')
        .trim_start_matches('+');

    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');
    let canonical = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(_), None) => digits.replace(',', "."),
        _ => digits.to_string(),
    };
    match canonical.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(PartialParseKind::NotNumeric),
    }
}

/// Parses the page's `dd/mm HH:MM` labels in the institute's local time.
///
/// Also accepts a `dd/mm/yyyy` or `dd/mm/yy` date, `-` separators, seconds,
/// and `24:00` as midnight of the following day. Without an explicit year the
/// reference year is used, stepping back one year when that would land more
/// than a day after the reference.
pub(crate) fn parse_fecha(
    label: &str,
    reference: DateTime<FixedOffset>,
    require_time: bool,
) -> Option<DateTime<FixedOffset>> {
    let mut parts = label.split_whitespace();
    let date = parts.next()?;
    let time = parts.next();
    if parts.next().is_some() || (require_time && time.is_none()) {
        return None;
    }

    let mut fields = date.split(['/', '-']);
    let day: u32 = fields.next()?.parse().ok()?;
    let month: u32 = fields.next()?.parse().ok()?;
    let year: Option<i32> = match fields.next() {
        Some(y) if y.len() == 2 => Some(2000 + y.parse::<i32>().ok()?),
        Some(y) if y.len() == 4 => Some(y.parse().ok()?),
        Some(_) => return None,
        None => None,
    };
    if fields.next().is_some() {
        return None;
    }

    let (hour, minute, second) = match time {
        Some(t) => parse_clock(t)?,
        None => (0, 0, 0),
    };

    let offset = *reference.offset();
    let build = |year: i32| -> Option<DateTime<FixedOffset>> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let naive = if hour == 24 {
            date.and_hms_opt(0, minute, second)? + Duration::days(1)
        } else {
            date.and_hms_opt(hour, minute, second)?
        };
        offset.from_local_datetime(&naive).single()
    };

    match year {
        Some(year) => build(year),
        None => {
            let this_year = reference.year();
            match build(this_year) {
                Some(ts) if ts <= reference + Duration::days(1) => Some(ts),
                // Later than tomorrow (or no such day this year): last year's label.
                _ => build(this_year - 1),
            }
        }
    }
}

fn parse_clock(t: &str) -> Option<(u32, u32, u32)> {
    let mut fields = t.split(':');
    let hour: u32 = fields.next()?.parse().ok()?;
    let minute: u32 = fields.next()?.parse().ok()?;
    let second: u32 = match fields.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if fields.next().is_some() || hour > 24 || (hour == 24 && (minute, second) != (0, 0)) {
        return None;
    }
    Some((hour, minute, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather_data::table_parser::parse_sections;
    use chrono::Timelike;

    fn costa_rica() -> FixedOffset {
        FixedOffset::west_opt(6 * 3600).unwrap()
    }

    fn reference() -> DateTime<FixedOffset> {
        costa_rica().with_ymd_and_hms(2025, 3, 14, 13, 5, 0).unwrap()
    }

    #[test]
    fn test_parse_number_locales() {
        assert_eq!(parse_number("2,3"), Ok(Some(2.3)));
        assert_eq!(parse_number("2.3"), Ok(Some(2.3)));
        assert_eq!(parse_number("1.234,5"), Ok(Some(1234.5)));
        assert_eq!(parse_number("1,234.5"), Ok(Some(1234.5)));
        assert_eq!(parse_number(" 24.5 °C"), Ok(Some(24.5)));
        assert_eq!(parse_number("88 %"), Ok(Some(88.0)));
        assert_eq!(parse_number("3,9 mm"), Ok(Some(3.9)));
        assert_eq!(parse_number("-1,5"), Ok(Some(-1.5)));
        assert_eq!(parse_number("0"), Ok(Some(0.0)));
        assert_eq!(parse_number(""), Ok(None));
    }

    #[test]
    fn test_parse_number_rejects_placeholders_and_text() {
        assert_eq!(parse_number("—"), Err(PartialParseKind::Placeholder));
        assert_eq!(parse_number("-"), Err(PartialParseKind::Placeholder));
        assert_eq!(parse_number("N/D"), Err(PartialParseKind::Placeholder));
        assert_eq!(parse_number("abc"), Err(PartialParseKind::NotNumeric));
        assert_eq!(parse_number("NaN"), Err(PartialParseKind::NotNumeric));
        assert_eq!(parse_number("inf"), Err(PartialParseKind::NotNumeric));
    }

    #[test]
    fn test_parse_fecha_formats() {
        let ts = parse_fecha("14/03 13:00", reference(), true).unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 3, 14));
        assert_eq!((ts.hour(), ts.minute()), (13, 0));
        assert_eq!(ts.offset(), &costa_rica());

        let ts = parse_fecha("13-03-25 07:30:15", reference(), true).unwrap();
        assert_eq!((ts.day(), ts.hour(), ts.minute(), ts.second()), (13, 7, 30, 15));

        let ts = parse_fecha("13/03 24:00", reference(), true).unwrap();
        assert_eq!((ts.day(), ts.hour()), (14, 0));

        let ts = parse_fecha("12/03", reference(), false).unwrap();
        assert_eq!((ts.day(), ts.hour()), (12, 0));

        assert!(parse_fecha("12/03", reference(), true).is_none());
        assert!(parse_fecha("32/03 10:00", reference(), true).is_none());
        assert!(parse_fecha("14/03 25:00", reference(), true).is_none());
        assert!(parse_fecha("ayer", reference(), false).is_none());
        assert!(parse_fecha("", reference(), false).is_none());
    }

    #[test]
    fn test_parse_fecha_year_rollover() {
        let new_year = costa_rica().with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let ts = parse_fecha("31/12 23:00", new_year, true).unwrap();
        assert_eq!(ts.year(), 2025);
        let ts = parse_fecha("01/01 00:00", new_year, true).unwrap();
        assert_eq!(ts.year(), 2026);
    }

    #[test]
    fn test_iso_round_trip() {
        let ts = parse_fecha("14/03 13:00", reference(), true).unwrap();
        let text = iso(&ts);
        assert_eq!(text, "2025-03-14T13:00:00-06:00");
        assert_eq!(DateTime::parse_from_rfc3339(&text).unwrap(), ts);
    }

    #[test]
    fn test_normalize_end_to_end_row() {
        let html = r#"
            <table>
              <tr><th>Fecha</th><th>Temp</th><th>HR</th><th>Lluvia</th></tr>
              <tr><td>14/03 13:00</td><td>24.5</td><td>88</td><td>2.3</td></tr>
            </table>
            <table>
              <tr><th>SUM_lluv</th><th>LLUV_ayer</th></tr>
              <tr><td>15.0</td><td>40.0</td></tr>
            </table>"#;
        let sections = parse_sections(html).unwrap();
        let normalized = normalize(&sections, reference());

        assert_eq!(normalized.hourly.len(), 1);
        let entry = &normalized.hourly[0];
        assert_eq!(entry.lluvia_mm, Some(2.3));
        assert_eq!(entry.temp_c, Some(24.5));
        assert_eq!(entry.hr_pct, Some(88.0));
        assert_eq!(entry.timestamp_iso.as_deref(), Some("2025-03-14T13:00:00-06:00"));

        let current = normalized.current.unwrap();
        assert_eq!(current.sum_lluv_mm, Some(15.0));
        assert_eq!(current.lluv_ayer_mm, Some(40.0));
        assert_eq!(current.timestamp, None);
        assert!(normalized.diagnostics.is_empty());
    }

    #[test]
    fn test_malformed_rain_cell_keeps_going() {
        let html = r#"
            <table>
              <tr><th>Fecha</th><th>Temp</th><th>Lluvia</th></tr>
              <tr><td>14/03 12:00</td><td>24,0</td><td>—</td></tr>
              <tr><td>14/03 13:00</td><td>24,5</td><td>0,0</td></tr>
            </table>"#;
        let sections = parse_sections(html).unwrap();
        let normalized = normalize(&sections, reference());

        assert_eq!(normalized.hourly.len(), 2);
        assert_eq!(normalized.hourly[0].lluvia_mm, None);
        assert_eq!(normalized.hourly[0].temp_c, Some(24.0));
        assert_eq!(normalized.hourly[1].lluvia_mm, Some(0.0));
        assert_eq!(normalized.diagnostics.len(), 1);
        let diag = &normalized.diagnostics[0];
        assert_eq!(diag.row, 0);
        assert_eq!(diag.field, Column::Lluvia);
        assert_eq!(diag.kind, PartialParseKind::Placeholder);
        assert_eq!(diag.raw, "—");
        assert!(normalized.current.is_none());
    }

    #[test]
    fn test_bad_timestamp_keeps_rain() {
        let html = r#"
            <table>
              <tr><th>Fecha</th><th>HR</th><th>Lluvia</th></tr>
              <tr><td>hora 13</td><td>90</td><td>4,2</td></tr>
              <tr><td>14/03 13:00</td><td>91</td></tr>
            </table>"#;
        let sections = parse_sections(html).unwrap();
        let normalized = normalize(&sections, reference());

        let first = &normalized.hourly[0];
        assert_eq!(first.timestamp, None);
        assert_eq!(first.timestamp_iso, None);
        assert_eq!(first.lluvia_mm, Some(4.2));
        let second = &normalized.hourly[1];
        assert!(second.timestamp.is_some() && second.timestamp_iso.is_some());
        assert_eq!(second.lluvia_mm, None);

        let kinds: Vec<_> = normalized.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            [PartialParseKind::BadTimestamp, PartialParseKind::MissingCell]
        );
    }

    #[test]
    fn test_normalize_fixture() {
        let sections = parse_sections(include_str!("../../fixtures/estacion_sample.html")).unwrap();
        let normalized = normalize(&sections, reference());

        let rain: Vec<_> = normalized.hourly.iter().map(|h| h.lluvia_mm).collect();
        assert_eq!(rain, [Some(0.0), Some(0.4), Some(1.2), Some(2.3)]);
        assert!(normalized
            .hourly
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(normalized.hourly[3].hr_pct, None);

        let current = normalized.current.as_ref().unwrap();
        assert_eq!(current.sum_lluv_mm, Some(3.9));
        assert_eq!(current.lluv_ayer_mm, Some(40.0));
        assert_eq!(current.peak_mm(), Some(40.0));

        assert_eq!(normalized.daily.len(), 3);
        assert_eq!(normalized.daily[1].lluvia_mm, Some(12.6));
        assert_eq!(normalized.daily[1].timestamp.map(|t| t.day()), Some(12));

        // only the "-" humidity on the last hourly row
        assert_eq!(normalized.diagnostics.len(), 1);
        assert_eq!(normalized.diagnostics[0].field, Column::Hr);
    }

    #[test]
    fn test_totals_from_hourly_columns() {
        let html = r#"
            <table>
              <tr><th>Fecha</th><th>Lluvia</th><th>SUM_lluv</th></tr>
              <tr><td>14/03 12:00</td><td>1,0</td><td>5,0</td></tr>
              <tr><td>14/03 13:00</td><td>0,5</td><td>5,5</td></tr>
              <tr><td>14/03 14:00</td><td>-</td><td></td></tr>
            </table>"#;
        let sections = parse_sections(html).unwrap();
        let normalized = normalize(&sections, reference());
        let current = normalized.current.unwrap();
        assert_eq!(current.fecha, "14/03 13:00");
        assert_eq!(current.sum_lluv_mm, Some(5.5));
        assert_eq!(current.lluv_ayer_mm, None);
    }

    #[test]
    fn test_date_and_time_in_separate_columns() {
        let html = r#"
            <table>
              <tr><th>Fecha</th><th>Hora</th><th>Temp</th><th>Lluvia</th></tr>
              <tr><td>14/03</td><td>12:00</td><td>24,0</td><td>1,2</td></tr>
              <tr><td>14/03</td><td>13:00</td><td>24,5</td><td>2,3</td></tr>
            </table>"#;
        let sections = parse_sections(html).unwrap();
        let normalized = normalize(&sections, reference());

        assert!(normalized.diagnostics.is_empty());
        let last = &normalized.hourly[1];
        assert_eq!(last.fecha, "14/03 13:00");
        assert_eq!(
            last.timestamp_iso.as_deref(),
            Some("2025-03-14T13:00:00-06:00")
        );
    }
}
