//! query_compiler.rs — Intent → SQL text.
//!
//! One template per intent variant, rendered for one of two dialects that
//! differ only in how a column is read:
//!
//! - `DirectColumn`: a real column of the per-request analytical table,
//!   read through the store's non-throwing `try_cast_double` /
//!   `try_cast_timestamp` functions.
//! - `JsonDocument`: a field of the `row_data` JSONB document in `data_rows`,
//!   read with `->>` and cast with `::numeric` / `::timestamp`.
//!
//! Literals are interpolated, not bound, so every identifier goes through
//! `escape_identifier` and every string literal (JSON keys included) through
//! `escape_literal`. Every template caps its row count.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::{
    AggregateFunction, AggregateMetric, CohortAnalysis, CompareMetric, Distribution, Filter,
    FilterValue, Intent, Operator, TimeGrain, TopList, TrendAnalysis,
};
use crate::schema_profile::ColumnSchema;

pub const DEFAULT_TABLE: &str = "current_analysis";
pub const DOCUMENT_TABLE: &str = "data_rows";
pub const DOCUMENT_COLUMN: &str = "row_data";

const AGGREGATE_GROUP_CAP: u32 = 100;
const TREND_CAP: u32 = 500;
const TOP_LIST_CAP: u32 = 100;
const DISTRIBUTION_CAP: u32 = 20;
const COMPARE_CAP: u32 = 12;
const COHORT_CAP: u32 = 24;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("Cannot generate query for {0} intent.")]
    UnsupportedIntent(&'static str),
    #[error("Column {column:?} does not exist in this dataset (available: {available})")]
    UnknownColumn { column: String, available: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    #[default]
    DirectColumn,
    JsonDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Numeric,
    Date,
    Boolean,
    Text,
}

// ── Escaping ─────────────────────────────────────────

/// `Sales "Q1"` → `"Sales ""Q1"""`
pub fn escape_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// `O'Brien` → `'O''Brien'`
pub fn escape_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn number_literal(n: f64) -> String {
    format!("{n}")
}

// ── Compiler ─────────────────────────────────────────

pub struct QueryCompiler<'a> {
    schema: &'a ColumnSchema,
    table: Option<String>,
    source_id: Option<String>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a ColumnSchema) -> Self {
        Self {
            schema,
            table: None,
            source_id: None,
        }
    }

    /// Override the table name (defaults: `current_analysis` / `data_rows`).
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Scope `JsonDocument` queries to one data source's rows.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn compile(&self, intent: &Intent, dialect: Dialect) -> Result<CompiledQuery, CompileError> {
        if intent.is_unknown() {
            return Err(CompileError::UnsupportedIntent(intent.type_name()));
        }
        self.check_columns(intent)?;

        let ctx = Render {
            dialect,
            table: self.table_for(dialect),
            where_clause: self.where_clause(intent.filters(), dialect),
        };

        let sql = match intent {
            Intent::AggregateMetric(i) => ctx.aggregate(i, self.counts_rows(i)),
            Intent::TrendAnalysis(i) => ctx.trend(i),
            Intent::TopList(i) => ctx.top_list(i),
            Intent::Distribution(i) => ctx.distribution(i),
            Intent::CompareMetric(i) => ctx.compare(i),
            Intent::CohortAnalysis(i) => ctx.cohort(i),
            Intent::Unknown(_) => return Err(CompileError::UnsupportedIntent(intent.type_name())),
        };

        Ok(CompiledQuery { sql, dialect })
    }

    fn table_for(&self, dialect: Dialect) -> String {
        let name = self.table.as_deref().unwrap_or(match dialect {
            Dialect::DirectColumn => DEFAULT_TABLE,
            Dialect::JsonDocument => DOCUMENT_TABLE,
        });
        escape_identifier(name)
    }

    /// `COUNT` over `*`/`count` with no such real column means a row count.
    fn counts_rows(&self, intent: &AggregateMetric) -> bool {
        intent.aggregate_function == AggregateFunction::Count
            && !self.schema.contains(&intent.metric_column)
            && (intent.metric_column == "*" || intent.metric_column.eq_ignore_ascii_case("count"))
    }

    fn check_columns(&self, intent: &Intent) -> Result<(), CompileError> {
        let skip_metric = match intent {
            Intent::AggregateMetric(i) => self.counts_rows(i),
            Intent::Distribution(i) => is_count_metric(&i.metric_column),
            _ => false,
        };

        for (idx, column) in intent.referenced_columns().into_iter().enumerate() {
            // the metric is always the first referenced column of those two variants
            if skip_metric && idx == 0 {
                continue;
            }
            if !self.schema.contains(column) {
                return Err(CompileError::UnknownColumn {
                    column: column.to_string(),
                    available: self.schema.columns().join(", "),
                });
            }
        }
        Ok(())
    }

    fn where_clause(&self, filters: &[Filter], dialect: Dialect) -> String {
        let mut clauses: Vec<String> = Vec::new();

        if dialect == Dialect::JsonDocument {
            if let Some(source_id) = &self.source_id {
                clauses.push(format!("data_source_id = {}", escape_literal(source_id)));
            }
        }

        clauses.extend(filters.iter().map(|f| filter_clause(f, dialect)));

        if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        }
    }
}

/// Convenience wrapper over `QueryCompiler` with default table names.
pub fn compile(
    intent: &Intent,
    dialect: Dialect,
    schema: &ColumnSchema,
) -> Result<CompiledQuery, CompileError> {
    QueryCompiler::new(schema).compile(intent, dialect)
}

fn is_count_metric(metric: &str) -> bool {
    metric.eq_ignore_ascii_case("count")
}

fn field(column: &str, kind: FieldKind, dialect: Dialect) -> String {
    match dialect {
        Dialect::DirectColumn => {
            let col = escape_identifier(column);
            match kind {
                FieldKind::Numeric => format!("try_cast_double({col})"),
                FieldKind::Date => format!("try_cast_timestamp({col})"),
                FieldKind::Boolean | FieldKind::Text => col,
            }
        }
        Dialect::JsonDocument => {
            let raw = format!("({}->>{})", DOCUMENT_COLUMN, escape_literal(column));
            match kind {
                FieldKind::Numeric => format!("{raw}::numeric"),
                FieldKind::Date => format!("{raw}::timestamp"),
                FieldKind::Boolean => format!("{raw}::boolean"),
                FieldKind::Text => raw,
            }
        }
    }
}

fn truncate(grain: TimeGrain, expr: &str) -> String {
    format!("DATE_TRUNC('{}', {})", grain.as_str(), expr)
}

fn filter_clause(filter: &Filter, dialect: Dialect) -> String {
    let cmp = match filter.operator {
        Operator::Eq => "=",
        Operator::Neq => "!=",
        Operator::Gt => ">",
        Operator::Lt => "<",
        Operator::Gte => ">=",
        Operator::Lte => "<=",
        Operator::Contains | Operator::Ilike => return pattern_clause(filter, dialect),
    };
    let (kind, literal) = match &filter.value {
        FilterValue::Number(n) => (FieldKind::Numeric, number_literal(*n)),
        FilterValue::Bool(true) => (FieldKind::Boolean, "TRUE".to_string()),
        FilterValue::Bool(false) => (FieldKind::Boolean, "FALSE".to_string()),
        FilterValue::Text(s) => (FieldKind::Text, escape_literal(s)),
    };
    format!("{} {} {}", field(&filter.column, kind, dialect), cmp, literal)
}

/// Case-insensitive match; `contains` wraps the value in `%` wildcards.
fn pattern_clause(filter: &Filter, dialect: Dialect) -> String {
    let expr = field(&filter.column, FieldKind::Text, dialect);
    let text = filter.value.to_string();
    let pattern = if filter.operator == Operator::Contains {
        escape_literal(&format!("%{text}%"))
    } else {
        escape_literal(&text)
    };
    match dialect {
        Dialect::DirectColumn => format!("LOWER({expr}) LIKE LOWER({pattern})"),
        Dialect::JsonDocument => format!("{expr} ILIKE {pattern}"),
    }
}

// ── Templates ────────────────────────────────────────

struct Render {
    dialect: Dialect,
    table: String,
    where_clause: String,
}

impl Render {
    fn field(&self, column: &str, kind: FieldKind) -> String {
        field(column, kind, self.dialect)
    }

    /// Join non-empty lines into the final statement.
    fn lines(parts: Vec<String>) -> String {
        parts
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn aggregate(&self, intent: &AggregateMetric, counts_rows: bool) -> String {
        let agg = if counts_rows {
            "COUNT(*)".to_string()
        } else if intent.aggregate_function == AggregateFunction::Count {
            // non-null values, whatever their type
            format!("COUNT({})", self.field(&intent.metric_column, FieldKind::Text))
        } else {
            format!(
                "{}({})",
                intent.aggregate_function.as_sql(),
                self.field(&intent.metric_column, FieldKind::Numeric)
            )
        };

        match &intent.group_by_column {
            Some(group_by) => {
                let group = self.field(group_by, FieldKind::Text);
                Self::lines(vec![
                    format!("SELECT {group} AS \"group\", {agg} AS \"value\""),
                    format!("FROM {}", self.table),
                    self.where_clause.clone(),
                    format!("GROUP BY {group}"),
                    "ORDER BY \"value\" DESC".to_string(),
                    format!("LIMIT {AGGREGATE_GROUP_CAP}"),
                ])
            }
            None => Self::lines(vec![
                format!("SELECT {agg} AS \"value\""),
                format!("FROM {}", self.table),
                self.where_clause.clone(),
            ]),
        }
    }

    fn trend(&self, intent: &TrendAnalysis) -> String {
        let metric = self.field(&intent.metric_column, FieldKind::Numeric);
        let date = self.field(&intent.date_column, FieldKind::Date);
        Self::lines(vec![
            format!(
                "SELECT {} AS \"date\", {}({metric}) AS \"value\"",
                truncate(intent.time_grain, &date),
                intent.aggregate_function.as_sql()
            ),
            format!("FROM {}", self.table),
            self.where_clause.clone(),
            "GROUP BY 1".to_string(),
            "ORDER BY 1 ASC".to_string(),
            format!("LIMIT {TREND_CAP}"),
        ])
    }

    fn top_list(&self, intent: &TopList) -> String {
        let metric = self.field(&intent.metric_column, FieldKind::Numeric);
        let dim = self.field(&intent.dimension_column, FieldKind::Text);
        Self::lines(vec![
            format!("SELECT {dim} AS \"label\", SUM({metric}) AS \"value\""),
            format!("FROM {}", self.table),
            self.where_clause.clone(),
            "GROUP BY 1".to_string(),
            format!("ORDER BY 2 {}", intent.order.as_sql()),
            format!("LIMIT {}", intent.limit.clamp(1, TOP_LIST_CAP)),
        ])
    }

    fn distribution(&self, intent: &Distribution) -> String {
        let dim = self.field(&intent.dimension_column, FieldKind::Text);
        let metric = if is_count_metric(&intent.metric_column) {
            "COUNT(*)".to_string()
        } else {
            format!("SUM({})", self.field(&intent.metric_column, FieldKind::Numeric))
        };
        Self::lines(vec![
            format!("SELECT {dim} AS \"label\", {metric} AS \"value\""),
            format!("FROM {}", self.table),
            self.where_clause.clone(),
            "GROUP BY 1".to_string(),
            "ORDER BY 2 DESC".to_string(),
            format!("LIMIT {DISTRIBUTION_CAP}"),
        ])
    }

    fn compare(&self, intent: &CompareMetric) -> String {
        let metric = self.field(&intent.metric_column, FieldKind::Numeric);
        let date = self.field(&intent.date_column, FieldKind::Date);
        let prev = "LAG(\"total_value\") OVER (ORDER BY \"period_date\")";
        Self::lines(vec![
            "WITH period_stats AS (".to_string(),
            format!(
                "    SELECT {} AS \"period_date\", SUM({metric}) AS \"total_value\"",
                truncate(intent.period.grain(), &date)
            ),
            format!("    FROM {}", self.table),
            format!("    {}", self.where_clause),
            "    GROUP BY 1".to_string(),
            ")".to_string(),
            "SELECT".to_string(),
            "    \"period_date\" AS \"date\",".to_string(),
            "    \"total_value\" AS \"current_value\",".to_string(),
            format!("    {prev} AS \"previous_value\","),
            format!("    \"total_value\" - {prev} AS \"change_value\","),
            format!(
                "    ROUND((\"total_value\" - {prev}) / NULLIF({prev}, 0) * 100, 2) AS \"percentage_change\""
            ),
            "FROM period_stats".to_string(),
            "ORDER BY 1 DESC".to_string(),
            format!("LIMIT {COMPARE_CAP}"),
        ])
    }

    fn cohort(&self, intent: &CohortAnalysis) -> String {
        let date = self.field(&intent.date_column, FieldKind::Date);
        Self::lines(vec![
            format!(
                "SELECT {} AS \"cohort_date\", COUNT(*) AS \"cohort_size\"",
                truncate(intent.interval.grain(), &date)
            ),
            format!("FROM {}", self.table),
            self.where_clause.clone(),
            "GROUP BY 1".to_string(),
            "ORDER BY 1 ASC".to_string(),
            format!("LIMIT {COHORT_CAP}"),
        ])
    }
}
