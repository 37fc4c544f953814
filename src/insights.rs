//! insights.rs — Deterministic headline statistics for a dataset.
//!
//! No model call: counts, sums and averages over the first numeric column and
//! the first text column of the schema.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::chart::{recommend_charts, ChartAnalysis};
use crate::schema_profile::{parse_number, ColumnSchema, ColumnType, Row};

pub const MAX_INSIGHTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Top,
    Comparison,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub value: String,
}

impl Insight {
    fn new(kind: InsightKind, title: String, description: String, value: String) -> Self {
        Self {
            kind,
            title,
            description,
            value,
        }
    }
}

/// Up to five insights: record count, total of the first numeric column, top
/// category by that total, average, distinct count of the first text column.
pub fn generate_insights(rows: &[Row], schema: &ColumnSchema) -> Vec<Insight> {
    let mut insights = Vec::new();
    if rows.is_empty() {
        return insights;
    }

    let numeric = schema.columns_of(ColumnType::Number).first().copied();
    let text = schema.columns_of(ColumnType::Text).first().copied();

    insights.push(Insight::new(
        InsightKind::Comparison,
        "Total Records".into(),
        format!("You have {} rows of data", rows.len()),
        group_thousands(rows.len() as f64, 0),
    ));

    if let Some(num) = numeric {
        let total: f64 = rows.iter().filter_map(|r| cell_number(r.get(num))).sum();
        insights.push(Insight::new(
            InsightKind::Comparison,
            format!("Total {num}"),
            format!("Sum of all {num} values"),
            group_thousands(total, 0),
        ));
    }

    if let (Some(cat), Some(num)) = (text, numeric) {
        if let Some((name, total)) = top_category(rows, cat, num) {
            insights.push(Insight::new(
                InsightKind::Top,
                format!("Top {cat}"),
                format!("{name} generated {} in {num}", group_thousands(total, 0)),
                name,
            ));
        }
    }

    if let Some(num) = numeric {
        let values: Vec<f64> = rows.iter().filter_map(|r| cell_number(r.get(num))).collect();
        if !values.is_empty() {
            let average = values.iter().sum::<f64>() / values.len() as f64;
            insights.push(Insight::new(
                InsightKind::Comparison,
                format!("Average {num}"),
                "Mean value across all records".into(),
                group_thousands(average, 2),
            ));
        }
    }

    if let Some(cat) = text {
        let distinct: HashSet<String> = rows.iter().map(|r| cell_key(r.get(cat))).collect();
        insights.push(Insight::new(
            InsightKind::Comparison,
            format!("Unique {cat}"),
            format!("Number of distinct {cat} values"),
            distinct.len().to_string(),
        ));
    }

    insights.truncate(MAX_INSIGHTS);
    insights
}

/// Headline insights plus chart recommendations for the raw rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetOverview {
    pub insights: Vec<Insight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charts: Option<ChartAnalysis>,
}

pub fn dataset_overview(rows: &[Row], schema: &ColumnSchema) -> DatasetOverview {
    DatasetOverview {
        insights: generate_insights(rows, schema),
        charts: recommend_charts(rows),
    }
}

/// One `title: description (value)` line per insight, for prompt context.
pub fn format_insights_for_prompt(insights: &[Insight]) -> String {
    insights
        .iter()
        .map(|i| format!("{}: {} ({})", i.title, i.description, i.value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Category with the largest summed metric; first seen wins ties.
fn top_category(rows: &[Row], category: &str, metric: &str) -> Option<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();
    for row in rows {
        let Some(value) = cell_number(row.get(metric)) else {
            continue;
        };
        let key = cell_key(row.get(category));
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += value;
    }

    let mut best: Option<(String, f64)> = None;
    for key in order {
        let total = totals.get(&key).copied().unwrap_or(0.0);
        if best.as_ref().map_or(true, |(_, max)| total > *max) {
            best = Some((key, total));
        }
    }
    best
}

fn cell_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn cell_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

/// `1234567.891` with 2 decimals → `1,234,567.89`. Trailing zeros trimmed.
fn group_thousands(value: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i.to_string(), f.trim_end_matches('0').to_string()),
        None => (rendered.clone(), String::new()),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && rendered.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    if frac_part.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac_part}")
    }
}
