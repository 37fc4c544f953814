//! askdata — chat with an uploaded table.
//!
//! A question is classified into a closed set of analytical intents, the
//! intent is compiled to SQL over the uploaded rows, the query runs on a
//! throwaway in-memory table, and the result comes back with a chart spec and
//! a plain-language explanation.

pub mod analytical_store;
pub mod chart;
pub mod chat;
pub mod config;
pub mod data_source;
pub mod insights;
pub mod intent;
pub mod intent_classifier;
pub mod llm;
pub mod logging;
pub mod query_compiler;
pub mod schema_profile;
pub mod suggestions;

pub use analytical_store::{AnalyticalStore, StoreError};
pub use chart::{pick_chart, recommend_charts, ChartKind, ChartSpec};
pub use chat::{ChatPipeline, ChatResponse};
pub use data_source::{DataSource, InMemorySource, JsonDirSource, SourceError};
pub use intent::{Intent, IntentError};
pub use intent_classifier::IntentClassifier;
pub use llm::{ChatMessage, CompletionRequest, LanguageModel, LlmClient, LlmError};
pub use query_compiler::{compile, CompileError, CompiledQuery, Dialect, QueryCompiler};
pub use schema_profile::{profile, ColumnSchema, ColumnType, Row};
