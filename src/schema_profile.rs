//! schema_profile.rs — Column type inference for uploaded row sets.
//!
//! The profiler looks at a small sample and decides one `ColumnType` per
//! column from the **first** sample row only. This is a cheap single-row
//! heuristic, recomputed for every request and never persisted.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One uploaded record: original column name → scalar value.
/// Key order follows the source file (serde_json `preserve_order`).
pub type Row = serde_json::Map<String, Value>;

lazy_static! {
    static ref ISO_DATE_PREFIX: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static ISO date regex");
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// ── Types ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Date,
    Text,
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Text => "text",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered column name → type mapping for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnSchema {
    columns: Vec<String>,
    types: HashMap<String, ColumnType>,
}

impl ColumnSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from `(name, type)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for (name, ty) in pairs {
            schema.insert(name, ty);
        }
        schema
    }

    /// Add a column, or retype it in place if already present.
    pub fn insert(&mut self, name: impl Into<String>, ty: ColumnType) {
        let name = name.into();
        if !self.types.contains_key(&name) {
            self.columns.push(name.clone());
        }
        self.types.insert(name, ty);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.types.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> + '_ {
        self.columns
            .iter()
            .map(|c| (c.as_str(), self.types.get(c).copied().unwrap_or(ColumnType::Unknown)))
    }

    /// Column names of the given type, in schema order.
    pub fn columns_of(&self, ty: ColumnType) -> Vec<&str> {
        self.iter().filter(|(_, t)| *t == ty).map(|(c, _)| c).collect()
    }
}

// ── Profiling ────────────────────────────────────────

/// Column names in source order: keys of the first row, then any key first
/// seen in a later row.
pub fn column_names(rows: &[Row]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    names
}

/// Profile a sample: columns come from the sample's keys, types from its first row.
pub fn profile(sample: &[Row]) -> ColumnSchema {
    let columns = column_names(sample);
    profile_columns(&columns, sample)
}

/// Columns from every row, types from the first `sample_rows` rows.
pub fn profile_sample(rows: &[Row], sample_rows: usize) -> ColumnSchema {
    let columns = column_names(rows);
    profile_columns(&columns, &rows[..rows.len().min(sample_rows)])
}

/// Profile a known column list against a sample. With an empty sample every
/// column is `Unknown`.
pub fn profile_columns(columns: &[String], sample: &[Row]) -> ColumnSchema {
    let first = sample.first();
    ColumnSchema::from_pairs(columns.iter().map(|col| {
        let ty = first
            .and_then(|row| row.get(col))
            .map(infer_value_type)
            .unwrap_or(ColumnType::Unknown);
        (col.clone(), ty)
    }))
}

/// Decide the type of a single cell value.
pub fn infer_value_type(value: &Value) -> ColumnType {
    match value {
        Value::Null => ColumnType::Unknown,
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => ColumnType::Number,
            _ => ColumnType::Text,
        },
        Value::String(s) => {
            if parse_number(s).is_some() {
                ColumnType::Number
            } else if is_date_like(s) {
                ColumnType::Date
            } else {
                ColumnType::Text
            }
        }
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => ColumnType::Text,
    }
}

/// Parse text as a finite number. Surrounding whitespace is ignored.
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// `YYYY-MM-DD` prefix that also parses to a valid calendar date/time.
pub fn is_date_like(s: &str) -> bool {
    ISO_DATE_PREFIX.is_match(s) && parse_timestamp(s).is_some()
}

/// Lenient timestamp parser shared with the analytical store's cast functions.
/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM[:SS[.fff]]` and bare `YYYY-MM-DD`.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
