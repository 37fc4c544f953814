//! analytical_store.rs — Ephemeral in-memory table engine for one chat turn.
//!
//! Each store owns a private in-memory SQLite connection. A turn loads the
//! uploaded rows into a throwaway table, runs one compiled query and drops
//! the store; nothing survives into the next turn.
//!
//! The connection registers the scalar functions the `DirectColumn` dialect
//! relies on: `try_cast_double`, `try_cast_timestamp` and `date_trunc`.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rusqlite::config::DbConfig;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::query_compiler::escape_identifier;
use crate::schema_profile::{parse_number, parse_timestamp, Row};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table name must not be empty")]
    EmptyTableName,
}

/// Column type of the analytical table, decided from the first row's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreColumnType {
    Double,
    Boolean,
    Text,
}

impl StoreColumnType {
    fn of(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(_)) => StoreColumnType::Double,
            Some(Value::Bool(_)) => StoreColumnType::Boolean,
            _ => StoreColumnType::Text,
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            StoreColumnType::Double => "DOUBLE",
            StoreColumnType::Boolean => "BOOLEAN",
            StoreColumnType::Text => "VARCHAR",
        }
    }
}

pub struct AnalyticalStore {
    conn: Connection,
}

impl AnalyticalStore {
    /// Fresh private in-memory database with the dialect functions registered.
    ///
    /// Double-quoted string literals are disabled, so a quoted identifier
    /// naming no column is an error instead of a string constant.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        register_functions(&conn)?;
        Ok(Self { conn })
    }

    /// Create `table` and bulk-insert `rows` positionally.
    ///
    /// The schema comes from the first row's keys and value types. Later rows
    /// missing one of those keys get NULL in that position; keys the first
    /// row lacks are ignored. An empty row set yields a one-column
    /// placeholder table so queries against it still resolve the table.
    pub fn load(&mut self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
        if table.trim().is_empty() {
            return Err(StoreError::EmptyTableName);
        }
        let table_sql = escape_identifier(table);

        let Some(first) = rows.first() else {
            self.conn
                .execute_batch(&format!("CREATE TABLE {table_sql} (id INTEGER)"))?;
            debug!(table, "created empty placeholder table");
            return Ok(());
        };

        let columns: Vec<&String> = first.keys().collect();
        let schema = columns
            .iter()
            .map(|col| {
                format!(
                    "{} {}",
                    escape_identifier(col),
                    StoreColumnType::of(first.get(col.as_str())).as_sql()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute_batch(&format!("CREATE TABLE {table_sql} ({schema})"))?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!("INSERT INTO {table_sql} VALUES ({placeholders})");

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                let values = columns
                    .iter()
                    .map(|col| to_sql_value(row.get(col.as_str())));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!(table, rows = rows.len(), columns = columns.len(), "loaded analytical table");
        Ok(())
    }

    /// Run one query and return every result row, keyed by result column name.
    ///
    /// Result columns read straight from a BOOLEAN column come back as JSON
    /// booleans.
    pub fn execute(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<(String, bool)> = stmt
            .columns()
            .iter()
            .map(|c| {
                let boolean = c
                    .decl_type()
                    .is_some_and(|t| t.eq_ignore_ascii_case(StoreColumnType::Boolean.as_sql()));
                (c.name().to_string(), boolean)
            })
            .collect();

        let mut out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, (name, boolean)) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Integer(n) if *boolean => Value::Bool(n != 0),
                    other => from_sql_value(other),
                };
                record.insert(name.clone(), value);
            }
            out.push(record);
        }
        Ok(out)
    }
}

/// Load `rows` into a fresh store, run `sql`, and drop the store.
pub fn run_ephemeral(table: &str, rows: &[Row], sql: &str) -> Result<Vec<Row>, StoreError> {
    let mut store = AnalyticalStore::open_in_memory()?;
    store.load(table, rows)?;
    store.execute(sql)
}

// ── Value conversion ─────────────────────────────────

fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::String("[BLOB]".to_string()),
    }
}

// ── Dialect functions ────────────────────────────────

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("try_cast_double", 1, flags, |ctx| {
        Ok(try_cast_double(ctx.get_raw(0)))
    })?;

    conn.create_scalar_function("try_cast_timestamp", 1, flags, |ctx| {
        Ok(value_timestamp(ctx.get_raw(0)).map(format_timestamp))
    })?;

    conn.create_scalar_function("date_trunc", 2, flags, |ctx| {
        let grain = match ctx.get_raw(0) {
            ValueRef::Text(t) => String::from_utf8_lossy(t).to_ascii_lowercase(),
            _ => return Ok(None),
        };
        Ok(value_timestamp(ctx.get_raw(1)).and_then(|ts| date_trunc(&grain, ts)))
    })?;

    Ok(())
}

fn try_cast_double(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(parse_number),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

fn value_timestamp(value: ValueRef<'_>) -> Option<NaiveDateTime> {
    match value {
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(parse_timestamp),
        _ => None,
    }
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate to the start of its bucket, rendered `YYYY-MM-DD`. Weeks start on Monday.
fn date_trunc(grain: &str, ts: NaiveDateTime) -> Option<String> {
    let date = ts.date();
    let start = match grain {
        "day" => date,
        "week" => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
        "month" => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
        "year" => NaiveDate::from_ymd_opt(date.year(), 1, 1)?,
        _ => return None,
    };
    Some(start.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Row> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_load_and_execute() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store
            .load(
                "current_analysis",
                &rows(json!([
                    {"Product": "A", "Sales": 10, "Active": true},
                    {"Product": "B", "Sales": 2.5, "Active": false},
                    {"Product": "A", "Sales": 5, "Active": true}
                ])),
            )
            .unwrap();

        let out = store
            .execute(
                "SELECT \"Product\" AS \"label\", SUM(\"Sales\") AS \"value\" \
                 FROM \"current_analysis\" GROUP BY 1 ORDER BY 2 DESC",
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["label"], "A");
        assert_eq!(out[0]["value"], 15.0);
        assert_eq!(out[1]["value"], 2.5);
        assert_eq!(out[0].keys().collect::<Vec<_>>(), vec!["label", "value"]);
    }

    #[test]
    fn test_missing_keys_become_null() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store
            .load(
                "t",
                &rows(json!([
                    {"a": "x", "b": 1},
                    {"a": "y"},
                    {"b": 3, "extra": "ignored"}
                ])),
            )
            .unwrap();
        let out = store.execute("SELECT COUNT(*) AS n, COUNT(\"b\") AS nb FROM \"t\"").unwrap();
        assert_eq!(out[0]["n"], 3);
        assert_eq!(out[0]["nb"], 2);

        let err = store.execute("SELECT \"extra\" FROM \"t\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_quoted_identifier_is_an_error() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store
            .load("t", &rows(json!([{"Product": "A"}, {"Product": "B", "Sales": 5}])))
            .unwrap();
        assert!(store.execute("SELECT SUM(\"Sales\") AS \"value\" FROM \"t\"").is_err());
        assert!(store
            .execute("SELECT COUNT(*) AS n FROM \"t\" WHERE \"Region\" = 'Region'")
            .is_err());
    }

    #[test]
    fn test_boolean_columns_come_back_as_booleans() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store
            .load(
                "t",
                &rows(json!([
                    {"Active": true, "Sales": 1},
                    {"Active": false, "Sales": 2},
                    {"Active": true, "Sales": 3}
                ])),
            )
            .unwrap();
        let out = store
            .execute(
                "SELECT \"Active\" AS \"label\", COUNT(*) AS \"value\" \
                 FROM \"t\" GROUP BY 1 ORDER BY 2 DESC",
            )
            .unwrap();
        assert_eq!(out[0]["label"], true);
        assert_eq!(out[0]["value"], 2);
        assert_eq!(out[1]["label"], false);

        // computed expressions keep their integer value
        let out = store.execute("SELECT SUM(\"Active\") AS n FROM \"t\"").unwrap();
        assert_eq!(out[0]["n"], 2);
    }

    #[test]
    fn test_empty_rows_create_placeholder() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store.load("current_analysis", &[]).unwrap();
        let out = store.execute("SELECT COUNT(*) AS \"value\" FROM \"current_analysis\"").unwrap();
        assert_eq!(out[0]["value"], 0);
    }

    #[test]
    fn test_malformed_query_is_an_error() {
        let mut store = AnalyticalStore::open_in_memory().unwrap();
        store.load("t", &rows(json!([{"a": 1}]))).unwrap();
        assert!(matches!(store.execute("SELEC nonsense"), Err(StoreError::Sqlite(_))));
        assert!(matches!(store.load(" ", &[]), Err(StoreError::EmptyTableName)));
    }

    #[test]
    fn test_stores_do_not_share_tables() {
        let mut first = AnalyticalStore::open_in_memory().unwrap();
        first.load("current_analysis", &rows(json!([{"a": 1}]))).unwrap();
        let second = AnalyticalStore::open_in_memory().unwrap();
        assert!(second.execute("SELECT * FROM \"current_analysis\"").is_err());
    }

    #[test]
    fn test_cast_functions() {
        let store = AnalyticalStore::open_in_memory().unwrap();
        let out = store
            .execute(
                "SELECT try_cast_double('12.5') AS a, try_cast_double('abc') AS b, \
                 try_cast_double(NULL) AS c, try_cast_timestamp('2024-03-05') AS d, \
                 try_cast_timestamp('soon') AS e",
            )
            .unwrap();
        assert_eq!(out[0]["a"], 12.5);
        assert!(out[0]["b"].is_null());
        assert!(out[0]["c"].is_null());
        assert_eq!(out[0]["d"], "2024-03-05 00:00:00");
        assert!(out[0]["e"].is_null());
    }

    #[test]
    fn test_date_trunc_buckets() {
        let ts = parse_timestamp("2024-03-14 15:20:00").unwrap(); // Thursday
        assert_eq!(date_trunc("day", ts).as_deref(), Some("2024-03-14"));
        assert_eq!(date_trunc("week", ts).as_deref(), Some("2024-03-11"));
        assert_eq!(date_trunc("month", ts).as_deref(), Some("2024-03-01"));
        assert_eq!(date_trunc("year", ts).as_deref(), Some("2024-01-01"));
        assert_eq!(date_trunc("quarter", ts), None);

        let store = AnalyticalStore::open_in_memory().unwrap();
        let out = store
            .execute("SELECT DATE_TRUNC('MONTH', try_cast_timestamp('2024-03-14T08:00:00Z')) AS m")
            .unwrap();
        assert_eq!(out[0]["m"], "2024-03-01");
    }

    #[test]
    fn test_run_ephemeral() {
        let out = run_ephemeral(
            "current_analysis",
            &rows(json!([{"Sales": "7"}, {"Sales": "3"}])),
            "SELECT SUM(try_cast_double(\"Sales\")) AS \"value\" FROM \"current_analysis\"",
        )
        .unwrap();
        assert_eq!(out[0]["value"], 10.0);
    }
}
