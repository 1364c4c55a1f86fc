//! CSV import of containers and items, and export of the current arrangement.
//!
//! Headers are matched by name, case-insensitively and ignoring unit suffixes
//! such as `(cm)`, so `Width(cm)`, `width` and `WIDTH (cm)` all address the same
//! column. Rows that fail to parse are collected with their 1-based line
//! number; they do not abort the rest of the file.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::model::{Container, Item};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CsvError {
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("malformed CSV: {0}")]
    Malformed(String),

    #[error("failed to write CSV: {0}")]
    Write(String),
}

impl From<csv::Error> for CsvError {
    fn from(err: csv::Error) -> Self {
        CsvError::Malformed(err.to_string())
    }
}

/// Per-row problem reported back to the importer.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

/// Parsed records plus the rows that were skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportReport<T> {
    pub records: Vec<T>,
    pub errors: Vec<RowError>,
}

/// Lowercases a header and drops parenthesised suffixes and separators.
fn normalize_header(raw: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (normalize_header(name), idx))
            .collect();
        Self { index }
    }

    fn require(&self, name: &'static str) -> Result<usize, CsvError> {
        self.index
            .get(name)
            .copied()
            .ok_or(CsvError::MissingColumn(name))
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

fn get_string_field(record: &csv::StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required_string(record: &csv::StringRecord, index: usize, name: &str) -> Result<String, String> {
    get_string_field(record, index).ok_or_else(|| format!("{name} is empty"))
}

fn required_f64(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, String> {
    let raw = required_string(record, index, name)?;
    raw.parse::<f64>()
        .map_err(|_| format!("{name} '{raw}' is not a number"))
}

fn optional_parse<T: std::str::FromStr>(
    record: &csv::StringRecord,
    index: Option<usize>,
    name: &str,
) -> Result<Option<T>, String> {
    match index.and_then(|idx| get_string_field(record, idx)) {
        None => Ok(None),
        Some(raw) if raw.eq_ignore_ascii_case("n/a") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{name} '{raw}' is invalid")),
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expiry date '{raw}' is not ISO formatted"))
}

/// Parses `Container ID, Zone, Width(cm), Depth(cm), Height(cm)`.
pub fn parse_containers(text: &str) -> Result<ImportReport<Container>, CsvError> {
    let mut reader = reader(text);
    let columns = Columns::from_headers(reader.headers()?);
    let id = columns.require("containerid")?;
    let zone = columns.require("zone")?;
    let width = columns.require("width")?;
    let depth = columns.require("depth")?;
    let height = columns.require("height")?;

    let mut report = ImportReport {
        records: Vec::new(),
        errors: Vec::new(),
    };
    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 2;
        let parsed = result.map_err(|err| err.to_string()).and_then(|record| {
            let dims = (
                required_f64(&record, width, "width")?,
                required_f64(&record, depth, "depth")?,
                required_f64(&record, height, "height")?,
            );
            Container::new(
                required_string(&record, id, "container id")?,
                required_string(&record, zone, "zone")?,
                dims,
            )
            .map_err(|err| err.to_string())
        });
        match parsed {
            Ok(container) => report.records.push(container),
            Err(message) => report.errors.push(RowError { row, message }),
        }
    }
    Ok(report)
}

/// Parses `Item ID, Name, Width(cm), Depth(cm), Height(cm), Mass(kg),
/// Priority (1-100), Expiry Date (ISO Format), Usage Limit, Preferred Zone`.
pub fn parse_items(text: &str) -> Result<ImportReport<Item>, CsvError> {
    let mut reader = reader(text);
    let columns = Columns::from_headers(reader.headers()?);
    let id = columns.require("itemid")?;
    let name = columns.require("name")?;
    let width = columns.require("width")?;
    let depth = columns.require("depth")?;
    let height = columns.require("height")?;
    let priority = columns.require("priority")?;
    let mass = columns.optional("mass");
    let expiry = columns.optional("expirydate");
    let usage_limit = columns.optional("usagelimit");
    let zone = columns.optional("preferredzone");

    let mut report = ImportReport {
        records: Vec::new(),
        errors: Vec::new(),
    };
    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 2;
        let parsed = result.map_err(|err| err.to_string()).and_then(|record| {
            let dims = (
                required_f64(&record, width, "width")?,
                required_f64(&record, depth, "depth")?,
                required_f64(&record, height, "height")?,
            );
            let priority_value = required_string(&record, priority, "priority")?;
            let priority_value = priority_value
                .parse::<i32>()
                .map_err(|_| format!("priority '{priority_value}' is not an integer"))?;
            if !(1..=100).contains(&priority_value) {
                return Err(format!("priority {priority_value} is outside 1-100"));
            }

            let mut item = Item::new(
                required_string(&record, id, "item id")?,
                required_string(&record, name, "name")?,
                dims,
                priority_value,
                zone.and_then(|idx| get_string_field(&record, idx))
                    .unwrap_or_default(),
            )
            .map_err(|err| err.to_string())?;

            if let Some(mass) = optional_parse::<f64>(&record, mass, "mass")? {
                if mass < 0.0 || !mass.is_finite() {
                    return Err(format!("mass {mass} must be non-negative"));
                }
                item = item.with_mass(mass);
            }
            if let Some(raw) = expiry
                .and_then(|idx| get_string_field(&record, idx))
                .filter(|raw| !raw.eq_ignore_ascii_case("n/a"))
            {
                item = item.with_expiry(parse_expiry(&raw)?);
            }
            if let Some(limit) = optional_parse::<u32>(&record, usage_limit, "usage limit")? {
                item = item.with_usage_limit(limit);
            }
            Ok(item)
        });
        match parsed {
            Ok(item) => report.records.push(item),
            Err(message) => report.errors.push(RowError { row, message }),
        }
    }
    Ok(report)
}

/// Writes `Item ID, Container ID, Coordinates (W1,D1,H1),(W2,D2,H2)` for every
/// placed item.
pub fn export_arrangement(items: &[Item]) -> Result<String, CsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["Item ID", "Container ID", "Coordinates (W1,D1,H1),(W2,D2,H2)"])
        .map_err(|err| CsvError::Write(err.to_string()))?;

    for item in items {
        let (Some(container_id), Some(position)) = (&item.container_id, &item.position) else {
            continue;
        };
        let start = position.start_coordinates;
        let end = position.end_coordinates;
        let coordinates = format!(
            "({},{},{}),({},{},{})",
            start.width, start.depth, start.height, end.width, end.depth, end.height
        );
        writer
            .write_record([item.id.as_str(), container_id.as_str(), coordinates.as_str()])
            .map_err(|err| CsvError::Write(err.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| CsvError::Write(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| CsvError::Write(err.to_string()))
}
