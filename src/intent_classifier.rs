//! intent_classifier.rs — Natural-language question → `Intent`.
//!
//! The reasoning service is asked for a single JSON object matching one
//! `Intent` variant. Anything that goes wrong (transport, timeout, prose
//! instead of JSON, a shape serde rejects) collapses to `UNKNOWN` with
//! confidence 0; the caller never sees a classification error.
//!
//! Column existence is not checked here. The compiler owns that check.

use tracing::{debug, info, warn};

use crate::intent::{Intent, IntentError};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel};
use crate::schema_profile::ColumnSchema;

pub const CLASSIFICATION_FAILED: &str = "System error during classification";

const DEFAULT_MAX_TOKENS: u32 = 1024;

const RULES: &str = "\
RULES:
1. Map purely to the schema provided. Do not hallucinate columns.
2. If the user asks for \"sales\", look for columns like \"revenue\", \"total_sales\", \"amount\".
3. If the user asks for a trend (\"over time\", \"monthly\"), use TREND_ANALYSIS.
4. If the user asks for \"breakdown\" or \"distribution\", use DISTRIBUTION.
5. If the user asks for \"top products\", \"best sellers\", use TOP_LIST.
6. If the user asks for \"breakdown by [category]\", use DISTRIBUTION.
7. If the user asks for a single number (\"total count\", \"average price\"), use AGGREGATE_METRIC.
8. If the user asks to compare two periods (e.g. \"sales this month vs last month\", \"YoY growth\"), use COMPARE_METRIC.
9. If the user asks for retention or cohorts (e.g. \"user retention by month\", \"cohort analysis\"), use COHORT_ANALYSIS.
10. If the user asks for a specific chart type (e.g. \"bar chart of...\"), map it to the most relevant intent (e.g. DISTRIBUTION or TOP_LIST).
11. If the request is ambiguous or impossible with these columns, return UNKNOWN.";

const SHAPES: &str = r#"Respond with ONE JSON object and nothing else. It must have one of these shapes:
{"type":"AGGREGATE_METRIC","metricColumn":str,"aggregateFunction":"SUM|AVG|COUNT|MIN|MAX","groupByColumn"?:str,"filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"TREND_ANALYSIS","metricColumn":str,"dateColumn":str,"aggregateFunction":"SUM|AVG|COUNT|MIN|MAX","timeGrain":"day|week|month|year","filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"TOP_LIST","metricColumn":str,"dimensionColumn":str,"limit":int,"order":"desc|asc","filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"DISTRIBUTION","metricColumn":str,"dimensionColumn":str,"filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"COMPARE_METRIC","metricColumn":str,"dateColumn":str,"period":"year_over_year|month_over_month|previous_period","filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"COHORT_ANALYSIS","dateColumn":str,"metricColumn"?:str,"interval":"day|week|month","filters":[Filter],"confidence":0..1,"reasoning":str}
{"type":"UNKNOWN","confidence":0..1,"reasoning":str}
Filter = {"column":str,"operator":"eq|neq|gt|lt|gte|lte|contains|ilike","value":str|number|boolean}"#;

/// Full classification prompt: role, schema, question, mapping rules, output shapes.
pub fn build_intent_prompt(question: &str, schema: &ColumnSchema) -> String {
    let schema_description = schema
        .iter()
        .map(|(col, ty)| format!("- \"{}\" (Type: {})", col, ty))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a precise data analyst engine. Your job is to map a user's question \
         to a structured analysis intent.\n\n\
         AVAILABLE COLUMNS:\n{schema_description}\n\n\
         USER QUESTION: \"{question}\"\n\n\
         {RULES}\n\n\
         {SHAPES}"
    )
}

/// Pull the intent object out of a model reply.
///
/// Tolerates Markdown fences and chatter around the object by taking the
/// span from the first `{` to the last `}`.
pub fn parse_intent_response(raw: &str) -> Result<Intent, IntentError> {
    let text = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };
    Intent::from_json(body)
}

pub struct IntentClassifier<M> {
    model: M,
    max_tokens: u32,
}

impl<M: LanguageModel> IntentClassifier<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Classify `question` against `schema`. Never fails.
    pub async fn classify(&self, question: &str, schema: &ColumnSchema) -> Intent {
        let request = CompletionRequest::new(vec![ChatMessage::user(build_intent_prompt(
            question, schema,
        ))])
        .max_tokens(self.max_tokens)
        .temperature(0.0)
        .json();

        let raw = match self.model.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Intent classification request failed: {}", e);
                return Intent::unknown(CLASSIFICATION_FAILED);
            }
        };

        match parse_intent_response(&raw) {
            Ok(intent) => {
                info!(
                    intent = intent.type_name(),
                    confidence = intent.confidence(),
                    "Determined intent"
                );
                intent
            }
            Err(e) => {
                warn!("Intent classification returned an unusable shape: {}", e);
                debug!(raw = %raw.chars().take(500).collect::<String>(), "rejected classifier output");
                Intent::unknown(CLASSIFICATION_FAILED)
            }
        }
    }
}
