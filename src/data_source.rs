//! data_source.rs — Where uploaded row sets come from.
//!
//! The chat pipeline only needs two lookups per turn: the rows of a data
//! source and the user who owns it. `InMemorySource` backs tests and
//! embedding; `JsonDirSource` serves a directory of `<source_id>.json` files.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::schema_profile::Row;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Data source not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub trait DataSource: Send + Sync {
    /// Every row of `source_id`, in stored order.
    fn fetch_rows(&self, source_id: &str) -> impl Future<Output = Result<Vec<Row>, SourceError>> + Send;

    /// Owning user of `source_id`, if the source records one.
    fn fetch_owner(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;
}

// ── In-memory ────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredSource {
    owner: Option<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    sources: HashMap<String, StoredSource>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_id: impl Into<String>, rows: Vec<Row>) {
        self.sources
            .insert(source_id.into(), StoredSource { owner: None, rows });
    }

    pub fn insert_owned(
        &mut self,
        source_id: impl Into<String>,
        owner: impl Into<String>,
        rows: Vec<Row>,
    ) {
        self.sources.insert(
            source_id.into(),
            StoredSource {
                owner: Some(owner.into()),
                rows,
            },
        );
    }

    fn get(&self, source_id: &str) -> Result<&StoredSource, SourceError> {
        self.sources
            .get(source_id)
            .ok_or_else(|| SourceError::NotFound(source_id.to_string()))
    }
}

impl DataSource for InMemorySource {
    fn fetch_rows(&self, source_id: &str) -> impl Future<Output = Result<Vec<Row>, SourceError>> + Send {
        let result = self.get(source_id).map(|s| s.rows.clone());
        async move { result }
    }

    fn fetch_owner(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Option<String>, SourceError>> + Send {
        let result = self.get(source_id).map(|s| s.owner.clone());
        async move { result }
    }
}

// ── JSON directory ───────────────────────────────────

/// `{ "owner": ..., "name": ..., "rows": [...] }`; other keys are ignored.
#[derive(Debug, Deserialize)]
struct SourceDocument {
    #[serde(default)]
    owner: Option<String>,
    rows: Vec<Value>,
}

#[derive(Debug)]
struct LoadedSource {
    owner: Option<String>,
    rows: Vec<Row>,
}

/// Serves `<dir>/<source_id>.json`, either a bare array of row objects or a
/// document with `owner`, `name` and `rows`.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source_id: &str) -> Result<PathBuf, SourceError> {
        // ids are file stems, never paths
        let valid = !source_id.is_empty()
            && !source_id.starts_with('.')
            && source_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(SourceError::NotFound(source_id.to_string()));
        }
        Ok(self.dir.join(format!("{source_id}.json")))
    }

    async fn load(&self, source_id: &str) -> Result<LoadedSource, SourceError> {
        let path = self.path_for(source_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(source_id.to_string()))
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };
        debug!(source_id, bytes = text.len(), "read data source file");
        parse_source(&path, &text)
    }
}

fn parse_source(path: &Path, text: &str) -> Result<LoadedSource, SourceError> {
    let parse_err = |message: String| SourceError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value: Value = serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
    let (owner, items) = match value {
        Value::Array(items) => (None, items),
        Value::Object(_) => {
            let doc: SourceDocument =
                serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;
            (doc.owner, doc.rows)
        }
        _ => return Err(parse_err("expected an array of rows or an object with \"rows\"".into())),
    };

    let rows = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(parse_err(format!("row {i} is not an object"))),
        })
        .collect::<Result<Vec<Row>, _>>()?;

    Ok(LoadedSource { owner, rows })
}

impl DataSource for JsonDirSource {
    fn fetch_rows(&self, source_id: &str) -> impl Future<Output = Result<Vec<Row>, SourceError>> + Send {
        let source_id = source_id.to_string();
        async move { self.load(&source_id).await.map(|s| s.rows) }
    }

    fn fetch_owner(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Option<String>, SourceError>> + Send {
        let source_id = source_id.to_string();
        async move { self.load(&source_id).await.map(|s| s.owner) }
    }
}
