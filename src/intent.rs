//! intent.rs — The closed vocabulary of analytical questions.
//!
//! An `Intent` is a tagged union: the `type` field selects exactly one
//! variant and only that variant's fields exist. The JSON shape matches what
//! the classifier asks the reasoning service to emit, e.g.
//! `{"type":"TOP_LIST","metricColumn":"Sales","dimensionColumn":"Product",...}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("invalid intent JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid intent: {0}")]
    Validation(String),
}

// ── Filter grammar ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    Ilike,
}

/// Filter literal. Untagged so `"x"`, `3.5` and `true` all deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Bool(b) => write!(f, "{b}"),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub value: FilterValue,
}

// ── Enumerations ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    #[serde(alias = "sum")]
    #[serde(rename = "SUM")]
    Sum,
    #[serde(alias = "avg")]
    #[serde(rename = "AVG")]
    Avg,
    #[serde(alias = "count")]
    #[serde(rename = "COUNT")]
    Count,
    #[serde(alias = "min")]
    #[serde(rename = "MIN")]
    Min,
    #[serde(alias = "max")]
    #[serde(rename = "MAX")]
    Max,
}

impl AggregateFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// Time bucket for trends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Year => "year",
        }
    }
}

/// Time bucket for cohorts. No yearly cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortInterval {
    Day,
    Week,
    #[default]
    Month,
}

impl CohortInterval {
    pub fn grain(&self) -> TimeGrain {
        match self {
            CohortInterval::Day => TimeGrain::Day,
            CohortInterval::Week => TimeGrain::Week,
            CohortInterval::Month => TimeGrain::Month,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparePeriod {
    YearOverYear,
    MonthOverMonth,
    PreviousPeriod,
}

impl ComparePeriod {
    /// Bucket the comparison runs on. Anything but year-over-year compares months.
    pub fn grain(&self) -> TimeGrain {
        match self {
            ComparePeriod::YearOverYear => TimeGrain::Year,
            ComparePeriod::MonthOverMonth | ComparePeriod::PreviousPeriod => TimeGrain::Month,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparePeriod::YearOverYear => "year_over_year",
            ComparePeriod::MonthOverMonth => "month_over_month",
            ComparePeriod::PreviousPeriod => "previous_period",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        }
    }
}

fn default_top_limit() -> u32 {
    5
}

// ── Variants ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetric {
    pub metric_column: String,
    pub aggregate_function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_column: Option<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub metric_column: String,
    pub date_column: String,
    pub aggregate_function: AggregateFunction,
    #[serde(default)]
    pub time_grain: TimeGrain,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopList {
    pub metric_column: String,
    pub dimension_column: String,
    #[serde(default = "default_top_limit")]
    pub limit: u32,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// A real column, or the literal `count` for row counts.
    pub metric_column: String,
    pub dimension_column: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareMetric {
    pub metric_column: String,
    pub date_column: String,
    pub period: ComparePeriod,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortAnalysis {
    pub date_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_column: Option<String>,
    #[serde(default)]
    pub interval: CohortInterval,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownIntent {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    AggregateMetric(AggregateMetric),
    TrendAnalysis(TrendAnalysis),
    TopList(TopList),
    Distribution(Distribution),
    CompareMetric(CompareMetric),
    CohortAnalysis(CohortAnalysis),
    Unknown(UnknownIntent),
}

impl Intent {
    pub fn unknown(reasoning: impl Into<String>) -> Self {
        Intent::Unknown(UnknownIntent {
            confidence: 0.0,
            reasoning: reasoning.into(),
        })
    }

    /// Wire tag, e.g. `"TOP_LIST"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Intent::AggregateMetric(_) => "AGGREGATE_METRIC",
            Intent::TrendAnalysis(_) => "TREND_ANALYSIS",
            Intent::TopList(_) => "TOP_LIST",
            Intent::Distribution(_) => "DISTRIBUTION",
            Intent::CompareMetric(_) => "COMPARE_METRIC",
            Intent::CohortAnalysis(_) => "COHORT_ANALYSIS",
            Intent::Unknown(_) => "UNKNOWN",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Intent::Unknown(_))
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Intent::AggregateMetric(i) => i.confidence,
            Intent::TrendAnalysis(i) => i.confidence,
            Intent::TopList(i) => i.confidence,
            Intent::Distribution(i) => i.confidence,
            Intent::CompareMetric(i) => i.confidence,
            Intent::CohortAnalysis(i) => i.confidence,
            Intent::Unknown(i) => i.confidence,
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Intent::AggregateMetric(i) => &i.reasoning,
            Intent::TrendAnalysis(i) => &i.reasoning,
            Intent::TopList(i) => &i.reasoning,
            Intent::Distribution(i) => &i.reasoning,
            Intent::CompareMetric(i) => &i.reasoning,
            Intent::CohortAnalysis(i) => &i.reasoning,
            Intent::Unknown(i) => &i.reasoning,
        }
    }

    pub fn filters(&self) -> &[Filter] {
        match self {
            Intent::AggregateMetric(i) => &i.filters,
            Intent::TrendAnalysis(i) => &i.filters,
            Intent::TopList(i) => &i.filters,
            Intent::Distribution(i) => &i.filters,
            Intent::CompareMetric(i) => &i.filters,
            Intent::CohortAnalysis(i) => &i.filters,
            Intent::Unknown(_) => &[],
        }
    }

    /// Every column name the intent mentions, filters included, in field order.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = match self {
            Intent::AggregateMetric(i) => {
                let mut v = vec![i.metric_column.as_str()];
                v.extend(i.group_by_column.as_deref());
                v
            }
            Intent::TrendAnalysis(i) => vec![&i.metric_column, &i.date_column],
            Intent::TopList(i) => vec![&i.metric_column, &i.dimension_column],
            Intent::Distribution(i) => vec![&i.metric_column, &i.dimension_column],
            Intent::CompareMetric(i) => vec![&i.metric_column, &i.date_column],
            Intent::CohortAnalysis(i) => {
                let mut v = vec![i.date_column.as_str()];
                v.extend(i.metric_column.as_deref());
                v
            }
            Intent::Unknown(_) => Vec::new(),
        };
        cols.extend(self.filters().iter().map(|f| f.column.as_str()));
        cols
    }

    /// Structural checks serde cannot express.
    pub fn validate(&self) -> Result<(), IntentError> {
        let confidence = self.confidence();
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(IntentError::Validation(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        if let Some(empty) = self.referenced_columns().iter().find(|c| c.trim().is_empty()) {
            return Err(IntentError::Validation(format!(
                "{} references an empty column name {:?}",
                self.type_name(),
                empty
            )));
        }
        for f in self.filters() {
            if let FilterValue::Number(n) = f.value {
                if !n.is_finite() {
                    return Err(IntentError::Validation(format!(
                        "filter on {:?} has a non-finite value",
                        f.column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse and validate one intent from JSON text.
    pub fn from_json(text: &str) -> Result<Self, IntentError> {
        let intent: Intent = serde_json::from_str(text)?;
        intent.validate()?;
        Ok(intent)
    }
}
