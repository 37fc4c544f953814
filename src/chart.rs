//! chart.rs — Result shape → chart spec.
//!
//! `pick_chart` maps an intent and its standardized result rows to a chart
//! description. It never looks at the user's column names in the rows, only
//! at the aliases the compiler emits (`value`, `group`, `label`, `date`, ...).
//!
//! `recommend_charts` is the schema-agnostic counterpart used for raw data
//! previews: it classifies the row set's columns and proposes charts.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::intent::{CohortInterval, Intent};
use crate::schema_profile::{is_date_like, parse_number, Row};

/// Largest row count still drawn as a pie.
pub const PIE_MAX_SLICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub kind: ChartKind,
    /// Category / x-axis key (pie: slice name).
    pub x_key: String,
    /// Value / y-axis key (pie: slice value).
    pub y_key: String,
    pub title: String,
}

impl ChartSpec {
    fn new(kind: ChartKind, x_key: &str, y_key: &str, title: String) -> Self {
        Self {
            kind,
            x_key: x_key.to_string(),
            y_key: y_key.to_string(),
            title,
        }
    }
}

/// Pick the default chart for a result set, or `None` for a text-only answer.
pub fn pick_chart(intent: &Intent, rows: &[Row]) -> Option<ChartSpec> {
    if rows.is_empty() {
        return None;
    }

    match intent {
        Intent::TrendAnalysis(i) => Some(ChartSpec::new(
            ChartKind::Line,
            "date",
            "value",
            format!("Trend of {}", i.metric_column),
        )),
        Intent::Distribution(i) if rows.len() <= PIE_MAX_SLICES => Some(ChartSpec::new(
            ChartKind::Pie,
            "label",
            "value",
            format!("Distribution of {}", i.metric_column),
        )),
        Intent::Distribution(i) => Some(ChartSpec::new(
            ChartKind::Bar,
            "label",
            "value",
            format!("Distribution: {} by {}", i.metric_column, i.dimension_column),
        )),
        Intent::TopList(i) => Some(ChartSpec::new(
            ChartKind::Bar,
            "label",
            "value",
            format!("Top {} {} by {}", i.limit, i.dimension_column, i.metric_column),
        )),
        Intent::AggregateMetric(i) => i.group_by_column.as_ref().map(|group| {
            ChartSpec::new(
                ChartKind::Bar,
                "group",
                "value",
                format!("{} by {}", i.metric_column, group),
            )
        }),
        Intent::CompareMetric(i) => Some(ChartSpec::new(
            ChartKind::Bar,
            "date",
            "current_value",
            format!("Comparison: {} ({})", i.metric_column, i.period.as_str()),
        )),
        Intent::CohortAnalysis(i) => Some(ChartSpec::new(
            ChartKind::Line,
            "cohort_date",
            "cohort_size",
            format!("Cohort Growth: {}", interval_label(i.interval)),
        )),
        Intent::Unknown(_) => None,
    }
}

fn interval_label(interval: CohortInterval) -> &'static str {
    match interval {
        CohortInterval::Day => "Daily",
        CohortInterval::Week => "Weekly",
        CohortInterval::Month => "Monthly",
    }
}

// ── Raw-data recommendations ─────────────────────────

/// Column roles of a row set, from its first row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnRoles {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub date: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRecommendation {
    #[serde(flatten)]
    pub spec: ChartSpec,
    pub score: u8,
    /// Pre-aggregated slices for pie recommendations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartAnalysis {
    pub columns: ColumnRoles,
    pub recommendations: Vec<ChartRecommendation>,
}

pub fn classify_columns(first: &Row) -> ColumnRoles {
    let mut roles = ColumnRoles::default();
    for (col, value) in first {
        let bucket = if is_numeric(value) {
            &mut roles.numeric
        } else if matches!(value, Value::String(s) if is_date_like(s)) {
            &mut roles.date
        } else {
            &mut roles.categorical
        };
        bucket.push(col.clone());
    }
    roles
}

/// Recommend charts for raw rows, best first. `None` for an empty row set.
pub fn recommend_charts(rows: &[Row]) -> Option<ChartAnalysis> {
    let first = rows.first()?;
    let columns = classify_columns(first);
    let mut recommendations = Vec::new();

    if let Some(y) = columns.numeric.first() {
        if let Some(x) = columns.date.first() {
            recommendations.push(ChartRecommendation {
                spec: ChartSpec::new(ChartKind::Line, x, y, format!("{y} over {x}")),
                score: 10,
                data: None,
            });
        }
        if let Some(x) = columns.categorical.first() {
            recommendations.push(ChartRecommendation {
                spec: ChartSpec::new(ChartKind::Bar, x, y, format!("{y} by {x}")),
                score: 9,
                data: None,
            });
            recommendations.push(ChartRecommendation {
                spec: ChartSpec::new(ChartKind::Pie, x, y, format!("Distribution of {y}")),
                score: 8,
                data: Some(aggregate_by_category(rows, x, y)),
            });
        }
    }

    recommendations.sort_by(|a, b| b.score.cmp(&a.score));
    Some(ChartAnalysis {
        columns,
        recommendations,
    })
}

/// Sum `value_key` per distinct `category_key`, in first-seen order.
/// Non-numeric values count as zero.
fn aggregate_by_category(rows: &[Row], category_key: &str, value_key: &str) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();

    for row in rows {
        let category = match row.get(category_key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        };
        let value = row.get(value_key).and_then(numeric_value).unwrap_or(0.0);
        if !totals.contains_key(&category) {
            order.push(category.clone());
        }
        *totals.entry(category).or_insert(0.0) += value;
    }

    order
        .into_iter()
        .map(|name| {
            let total = totals.get(&name).copied().unwrap_or(0.0);
            let mut slice = Row::new();
            slice.insert(category_key.to_string(), Value::String(name));
            slice.insert(value_key.to_string(), Value::from(total));
            slice
        })
        .collect()
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn is_numeric(value: &Value) -> bool {
    numeric_value(value).is_some_and(f64::is_finite)
}
