//! chat.rs — One chat turn: question in, answer out.
//!
//! classify → compile → load → execute → chart + narrate, strictly in that
//! order. Every failure becomes a `ChatResponse`; nothing here returns an
//! error or panics on bad input. No stage is retried.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::analytical_store::run_ephemeral;
use crate::chart::{pick_chart, ChartSpec};
use crate::config::{AnalysisConfig, AppConfig};
use crate::data_source::{DataSource, SourceError};
use crate::intent::Intent;
use crate::intent_classifier::IntentClassifier;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel};
use crate::query_compiler::{Dialect, QueryCompiler};
use crate::schema_profile::{profile_sample, Row};

pub const INTERNAL_ERROR: &str = "Sorry, I encountered an internal error. Please try again.";
pub const NOT_FOUND: &str = "Data source not found";
pub const UNAUTHORIZED: &str = "Unauthorized";
pub const MISSING_INPUT: &str = "Message and dataSourceId required";
const UNKNOWN_FALLBACK: &str = "Could you try asking differently?";

/// Answer to one turn. Optional fields are omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub error: bool,
}

impl ChatResponse {
    fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sql: None,
            intent: None,
            data: None,
            row_count: None,
            chart: None,
            error: false,
        }
    }

    fn failure(content: impl Into<String>) -> Self {
        Self {
            error: true,
            ..Self::message(content)
        }
    }
}

pub struct ChatPipeline<S, M> {
    source: S,
    classifier: IntentClassifier<M>,
    analysis: AnalysisConfig,
    narrate_max_tokens: u32,
    narrate_temperature: f32,
}

impl<S: DataSource, M: LanguageModel> ChatPipeline<S, M> {
    pub fn new(source: S, model: M) -> Self {
        Self::with_config(source, model, &AppConfig::default())
    }

    pub fn with_config(source: S, model: M, cfg: &AppConfig) -> Self {
        Self {
            source,
            classifier: IntentClassifier::new(model).with_max_tokens(cfg.llm.classify_max_tokens),
            analysis: cfg.analysis.clone(),
            narrate_max_tokens: cfg.llm.narrate_max_tokens,
            narrate_temperature: cfg.llm.narrate_temperature,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn model(&self) -> &M {
        self.classifier.model()
    }

    /// Like `handle_question`, but only for the source's owner. Sources that
    /// record no owner are open to everyone.
    pub async fn handle_question_as(
        &self,
        user_id: &str,
        question: &str,
        source_id: &str,
    ) -> ChatResponse {
        match self.source.fetch_owner(source_id).await {
            Ok(Some(owner)) if owner != user_id => {
                warn!(source_id, user_id, "ownership check failed");
                ChatResponse::failure(UNAUTHORIZED)
            }
            Ok(_) => self.handle_question(question, source_id).await,
            Err(e) => source_failure(source_id, e),
        }
    }

    pub async fn handle_question(&self, question: &str, source_id: &str) -> ChatResponse {
        if question.trim().is_empty() || source_id.trim().is_empty() {
            return ChatResponse::failure(MISSING_INPUT);
        }

        let rows = match self.source.fetch_rows(source_id).await {
            Ok(rows) => rows,
            Err(e) => return source_failure(source_id, e),
        };
        self.analyze(question, rows).await
    }

    /// Run a turn against rows the caller already holds.
    pub async fn analyze(&self, question: &str, mut rows: Vec<Row>) -> ChatResponse {
        if rows.len() > self.analysis.max_rows {
            warn!(
                rows = rows.len(),
                max_rows = self.analysis.max_rows,
                "row set truncated before analysis"
            );
            rows.truncate(self.analysis.max_rows);
        }

        let schema = profile_sample(&rows, self.analysis.sample_rows);

        // 1. Classify
        let intent = self.classifier.classify(question, &schema).await;
        if let Intent::Unknown(unknown) = &intent {
            let hint = if unknown.reasoning.trim().is_empty() {
                UNKNOWN_FALLBACK
            } else {
                unknown.reasoning.as_str()
            };
            return ChatResponse::message(format!("I'm not sure how to analyze that. {hint}"));
        }

        // 2. Compile
        let table = self.analysis.table_name.clone();
        let compiled = match QueryCompiler::new(&schema)
            .with_table(table.clone())
            .compile(&intent, Dialect::DirectColumn)
        {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(intent = intent.type_name(), "query compilation failed: {}", e);
                return ChatResponse::failure(format!(
                    "I understood your intent ({}) but couldn't construct the query: {}",
                    intent.type_name(),
                    e
                ));
            }
        };
        debug!(sql = %compiled.sql, "Generated query");

        // 3. Load + execute on a store private to this turn
        let sql = compiled.sql.clone();
        let executed = tokio::task::spawn_blocking(move || run_ephemeral(&table, &rows, &sql)).await;
        let data = match executed {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!(sql = %compiled.sql, "analysis execution failed: {}", e);
                return ChatResponse {
                    sql: Some(compiled.sql),
                    ..ChatResponse::failure(format!("Error executing analysis: {e}"))
                };
            }
            Err(e) => {
                error!("analysis worker failed: {}", e);
                return ChatResponse::failure(INTERNAL_ERROR);
            }
        };
        info!(intent = intent.type_name(), rows = data.len(), "analysis executed");

        // 4. Shape + explain
        let chart = pick_chart(&intent, &data);
        let content = self.narrate(question, &data).await;

        ChatResponse {
            content,
            sql: Some(compiled.sql),
            row_count: Some(data.len()),
            data: Some(data),
            intent: Some(intent),
            chart,
            error: false,
        }
    }

    async fn narrate(&self, question: &str, data: &[Row]) -> String {
        let prompt = narration_prompt(question, data, self.analysis.narration_preview_chars);
        let request = CompletionRequest::new(vec![ChatMessage::system(prompt)])
            .max_tokens(self.narrate_max_tokens)
            .temperature(self.narrate_temperature);

        match self.model().complete(request).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("narration failed, using plain summary: {}", e);
                fallback_summary(data)
            }
        }
    }
}

fn source_failure(source_id: &str, err: SourceError) -> ChatResponse {
    match err {
        SourceError::NotFound(_) => {
            info!(source_id, "data source not found");
            ChatResponse::failure(NOT_FOUND)
        }
        other => {
            error!(source_id, "data source lookup failed: {}", other);
            ChatResponse::failure(INTERNAL_ERROR)
        }
    }
}

/// System prompt for explaining a result; the JSON result is cut to `preview_chars`.
pub fn narration_prompt(question: &str, data: &[Row], preview_chars: usize) -> String {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "[]".to_string());
    let preview: String = json.chars().take(preview_chars).collect();
    format!(
        "You are a helpful data analyst.\n\
         The user asked: \"{question}\".\n\n\
         The analysis returned:\n\
         {preview}\n\n\
         Explain the result simply. Focus on the numbers. Do not mention \"SQL\"."
    )
}

/// Plain-text answer used when the narration call fails.
pub fn fallback_summary(data: &[Row]) -> String {
    match data {
        [] => "The analysis returned no matching rows.".to_string(),
        [only] => format!("Result: {}.", describe_row(only)),
        [first, ..] => format!(
            "The analysis returned {} rows. First row: {}.",
            data.len(),
            describe_row(first)
        ),
    }
}

fn describe_row(row: &Row) -> String {
    row.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k} = {s}"),
            other => format!("{k} = {other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
