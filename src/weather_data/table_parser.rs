//! Turns the institute's station page into raw, labelled sections.
//!
//! The page is a pile of nested layout tables with no ids or classes worth
//! relying on, and its column order has changed over time. Sections are
//! therefore discovered by the abbreviations used as column headers
//! (`Temp`, `HR`, `Lluvia`, `SUM_lluv`, `LLUV_ayer`) rather than by position.
//! Cells stay raw strings; interpreting them is the normalizer's job.

use crate::weather_data::error::ParseError;
use log::{debug, warn};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td, th"));
static CAPTION: LazyLock<Selector> = LazyLock::new(|| selector("caption"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector should be valid")
}

/// A column label the page uses as a header abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Column {
    Fecha,
    /// Time of day, when the page splits it from the date.
    Hora,
    Temp,
    Hr,
    Lluvia,
    SumLluv,
    LluvAyer,
}

impl Column {
    /// Recognizes a header cell, ignoring case, separators and a unit suffix.
    pub(crate) fn recognize(cell: &str) -> Option<Column> {
        let label = cell.split(['(', '[']).next().unwrap_or_default();
        let key: String = label
            .trim()
            .trim_end_matches(':')
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '.' | '-' | '/'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "fecha" | "fechahora" | "fechayhora" => Some(Column::Fecha),
            "hora" => Some(Column::Hora),
            "temp" => Some(Column::Temp),
            "hr" => Some(Column::Hr),
            "lluvia" | "lluv" => Some(Column::Lluvia),
            "sumlluv" => Some(Column::SumLluv),
            "lluvayer" => Some(Column::LluvAyer),
            _ => None,
        }
    }

    fn is_measurement(self) -> bool {
        !matches!(self, Column::Fecha | Column::Hora)
    }

    pub fn label(self) -> &'static str {
        match self {
            Column::Fecha => "Fecha",
            Column::Hora => "Hora",
            Column::Temp => "Temp",
            Column::Hr => "HR",
            Column::Lluvia => "Lluvia",
            Column::SumLluv => "SUM_lluv",
            Column::LluvAyer => "LLUV_ayer",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which block of the page a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Hourly,
    Totals,
    Daily,
}

impl SectionKind {
    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Hourly => "horario",
            SectionKind::Totals => "totales",
            SectionKind::Daily => "diario",
        }
    }

    fn from_title(title: &str) -> Option<SectionKind> {
        let t = title.to_lowercase();
        if t.contains("horari") {
            Some(SectionKind::Hourly)
        } else if t.contains("diari") || t.contains("días") || t.contains("dias") {
            Some(SectionKind::Daily)
        } else if t.contains("acumulad") || t.contains("total") || t.contains("resumen") {
            Some(SectionKind::Totals)
        } else {
            None
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Section {
    pub title: String,
    pub header: Vec<String>,
    pub columns: BTreeMap<Column, usize>,
    pub rows: Vec<Vec<String>>,
}

impl Section {
    pub fn has(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }
}

/// Section name to rows, as found on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Sections {
    by_kind: BTreeMap<SectionKind, Section>,
}

impl Sections {
    pub fn get(&self, kind: SectionKind) -> Option<&Section> {
        self.by_kind.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_kind.keys().map(|k| k.name())
    }

    fn insert(&mut self, kind: SectionKind, section: Section) {
        match self.by_kind.get_mut(&kind) {
            None => {
                self.by_kind.insert(kind, section);
            }
            Some(existing) if existing.columns == section.columns => {
                existing.rows.extend(section.rows);
            }
            Some(existing) => {
                warn!(
                    "Dropping second '{}' section '{}' with header {:?}; already have {:?}",
                    kind, section.title, section.header, existing.header
                );
            }
        }
    }
}

/// Parses a station page into sections.
///
/// Fails only when nothing on the page looks like a weather table, which is
/// what an error or maintenance page looks like.
pub(crate) fn parse_sections(html: &str) -> Result<Sections, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    let document = Html::parse_document(html);
    let mut sections = Sections::default();

    for table in document.select(&TABLE).filter(is_leaf_table) {
        let rows = table_rows(table);
        let outer_title = table_title(table);
        if outer_title
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains("abreviatura"))
        {
            continue;
        }
        for (kind, section) in split_table(&rows, outer_title.as_deref()) {
            debug!(
                "Found '{}' section '{}' with {} rows",
                kind,
                section.title,
                section.rows.len()
            );
            sections.insert(kind, section);
        }
    }

    if sections.is_empty() {
        return Err(ParseError::NoSections { bytes: html.len() });
    }
    debug!("Parsed sections {:?}", sections.names().collect::<Vec<_>>());
    Ok(sections)
}

fn is_leaf_table(table: &ElementRef) -> bool {
    !table.select(&TABLE).any(|inner| inner != *table)
}

fn table_rows(table: ElementRef) -> Vec<Vec<String>> {
    table
        .select(&ROW)
        .map(|row| row.select(&CELL).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .collect()
}

fn cell_text(cell: ElementRef) -> String {
    normalize_ws(&cell.text().collect::<Vec<_>>().join(" "))
}

/// Collapse runs of whitespace (non-breaking spaces included) and trim.
fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Caption, or the nearest heading-ish text right before the table.
fn table_title(table: ElementRef) -> Option<String> {
    if let Some(caption) = table.select(&CAPTION).next() {
        let text = cell_text(caption);
        if !text.is_empty() {
            return Some(text);
        }
    }
    for sibling in table.prev_siblings().take(4) {
        match sibling.value() {
            Node::Text(text) => {
                let text = normalize_ws(text);
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Node::Element(el) => match el.name() {
                "br" => continue,
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "b" | "strong" | "p" | "span"
                | "font" | "div" => {
                    let text = ElementRef::wrap(sibling).map(cell_text).unwrap_or_default();
                    return (!text.is_empty()).then_some(text);
                }
                _ => return None,
            },
            _ => continue,
        }
    }
    None
}

fn header_columns(row: &[String]) -> Option<BTreeMap<Column, usize>> {
    let mut columns = BTreeMap::new();
    for (idx, cell) in row.iter().enumerate() {
        if let Some(column) = Column::recognize(cell) {
            columns.entry(column).or_insert(idx);
        }
    }
    // A lone time column is the row label.
    if !columns.contains_key(&Column::Fecha) {
        if let Some(idx) = columns.remove(&Column::Hora) {
            columns.insert(Column::Fecha, idx);
        }
    }
    let measurements = columns.keys().filter(|c| c.is_measurement()).count();
    (columns.len() >= 2 && measurements >= 1).then_some(columns)
}

/// A single spanning cell, as used for block titles inside a table.
fn is_title_row(row: &[String]) -> bool {
    row.len() == 1 && header_columns(row).is_none()
}

/// Splits one table's rows into sections; a table may hold several header rows.
fn split_table(rows: &[Vec<String>], outer_title: Option<&str>) -> Vec<(SectionKind, Section)> {
    let mut found = Vec::new();
    let mut pending_title: Option<String> = None;
    let mut current: Option<Section> = None;
    let mut key_values: Vec<(Column, String)> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        if let Some(columns) = header_columns(row) {
            if let Some(section) = current.as_ref() {
                if section.columns == columns {
                    continue;
                }
            }
            if let Some(section) = current.take() {
                found.push(section);
            }
            let title = pending_title
                .take()
                .or_else(|| outer_title.map(str::to_string))
                .unwrap_or_default();
            current = Some(Section {
                title,
                header: row.clone(),
                columns,
                rows: Vec::new(),
            });
            continue;
        }

        if let Some(pair) = totals_key_value(row) {
            key_values.push(pair);
            continue;
        }

        let Some(section) = current.as_mut() else {
            if is_title_row(row) {
                pending_title = Some(row[0].clone());
            }
            continue;
        };
        if !is_title_row(row) {
            section.rows.push(row.clone());
        } else if rows.get(i + 1).is_some_and(|next| header_columns(next).is_some()) {
            found.extend(current.take());
            pending_title = Some(row[0].clone());
        } else {
            // Day separators and footnotes inside a block.
            debug!("Skipping spanning row '{}' in '{}'", row[0], section.title);
        }
    }
    if let Some(section) = current.take() {
        found.push(section);
    }

    let mut out: Vec<(SectionKind, Section)> = found
        .into_iter()
        .map(|mut section| {
            let kind = classify_section(&section);
            if section.title.is_empty() {
                section.title = kind.name().to_string();
            }
            (kind, section)
        })
        .collect();

    if !key_values.is_empty() {
        out.push((
            SectionKind::Totals,
            vertical_totals(key_values, outer_title),
        ));
    }
    out
}

/// A `SUM_lluv | 15,0` style row from a vertically laid out totals block.
fn totals_key_value(row: &[String]) -> Option<(Column, String)> {
    let mut cells = row.iter().filter(|c| !c.is_empty());
    let (key, value) = (cells.next()?, cells.next()?);
    if cells.next().is_some() {
        return None;
    }
    let column = Column::recognize(key)?;
    if !matches!(column, Column::SumLluv | Column::LluvAyer) {
        return None;
    }
    let letters = value.chars().filter(|c| c.is_alphabetic()).count();
    let looks_like_value = value.chars().any(|c| c.is_ascii_digit()) && letters <= 2;
    looks_like_value.then(|| (column, value.clone()))
}

fn vertical_totals(pairs: Vec<(Column, String)>, title: Option<&str>) -> Section {
    let mut columns = BTreeMap::new();
    let mut header = Vec::new();
    let mut row = Vec::new();
    for (column, value) in pairs {
        if columns.contains_key(&column) {
            continue;
        }
        columns.insert(column, header.len());
        header.push(column.label().to_string());
        row.push(value);
    }
    Section {
        title: title
            .map(str::to_string)
            .unwrap_or_else(|| SectionKind::Totals.name().to_string()),
        header,
        columns,
        rows: vec![row],
    }
}

fn classify_section(section: &Section) -> SectionKind {
    if section.has(Column::Temp) || section.has(Column::Hr) || section.has(Column::Hora) {
        return SectionKind::Hourly;
    }
    let has_totals = section.has(Column::SumLluv) || section.has(Column::LluvAyer);
    if has_totals && !section.has(Column::Lluvia) {
        return SectionKind::Totals;
    }
    if let Some(kind) = SectionKind::from_title(&section.title) {
        return kind;
    }
    let first_label = section
        .columns
        .get(&Column::Fecha)
        .and_then(|&idx| section.rows.first().and_then(|r| r.get(idx)));
    match first_label {
        Some(label) if label.contains(':') => SectionKind::Hourly,
        Some(_) => SectionKind::Daily,
        None if has_totals => SectionKind::Hourly,
        None => SectionKind::Daily,
    }
}
