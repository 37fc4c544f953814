use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use askdata::chat::{INTERNAL_ERROR, NOT_FOUND, UNAUTHORIZED};
use askdata::config::AppConfig;
use askdata::intent_classifier::CLASSIFICATION_FAILED;
use askdata::{
    ChartKind, ChatPipeline, CompletionRequest, InMemorySource, LanguageModel, LlmError, Row,
};
use serde_json::{json, Value};

/// Replays canned replies in order; errors once the script runs out.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front().ok_or(LlmError::NoProvider);
        async move { reply }
    }
}

fn rows(v: Value) -> Vec<Row> {
    v.as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().cloned().unwrap())
        .collect()
}

fn sales_rows() -> Vec<Row> {
    rows(json!([
        {"Date": "2024-01-15", "Product": "Widget", "Region": "North", "Sales": 120},
        {"Date": "2024-01-20", "Product": "Gadget", "Region": "South", "Sales": 80},
        {"Date": "2024-02-03", "Product": "Widget", "Region": "South", "Sales": 60},
        {"Date": "2024-02-11", "Product": "Gizmo", "Region": "North", "Sales": 40.5}
    ]))
}

fn pipeline(replies: &[&str]) -> ChatPipeline<InMemorySource, ScriptedModel> {
    let mut source = InMemorySource::new();
    source.insert("sales", sales_rows());
    source.insert_owned("private", "alice", sales_rows());
    ChatPipeline::new(source, ScriptedModel::new(replies))
}

const TOTAL_SALES: &str = r#"{"type":"AGGREGATE_METRIC","metricColumn":"Sales","aggregateFunction":"SUM","filters":[],"confidence":0.95,"reasoning":"single total"}"#;
const SALES_BY_PRODUCT: &str = r#"{"type":"AGGREGATE_METRIC","metricColumn":"Sales","aggregateFunction":"SUM","groupByColumn":"Product","filters":[],"confidence":0.9,"reasoning":"grouped total"}"#;

#[tokio::test]
async fn test_scenario_total_sales() {
    let p = pipeline(&[TOTAL_SALES, "Total sales were 300.5."]);
    let resp = p.handle_question("What were total Sales?", "sales").await;

    assert!(!resp.error, "{}", resp.content);
    assert_eq!(resp.content, "Total sales were 300.5.");
    let sql = resp.sql.as_deref().unwrap();
    assert!(sql.contains("SUM(try_cast_double(\"Sales\")) AS \"value\""));
    assert!(!sql.contains("GROUP BY"));
    assert_eq!(resp.row_count, Some(1));
    assert_eq!(resp.data.as_ref().unwrap()[0]["value"], 300.5);
    assert!(resp.chart.is_none());

    let requests = p.model().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].json_mode);
    assert!(!requests[1].json_mode);
    assert_eq!(requests[1].messages[0].role, "system");
    assert!(requests[1].messages[0].content.contains("\"value\":300.5"));
}

#[tokio::test]
async fn test_scenario_sales_by_product() {
    let p = pipeline(&[SALES_BY_PRODUCT, "Widget leads."]);
    let resp = p.handle_question("Show me Sales by Product", "sales").await;

    assert!(!resp.error, "{}", resp.content);
    let sql = resp.sql.as_deref().unwrap();
    assert!(sql.contains("GROUP BY \"Product\""));
    assert!(sql.contains("ORDER BY \"value\" DESC"));
    assert!(sql.ends_with("LIMIT 100"));

    let data = resp.data.as_ref().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["group"], "Widget");
    assert_eq!(data[0]["value"], 180.0);
    assert_eq!(data[2]["group"], "Gizmo");

    let chart = resp.chart.unwrap();
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x_key, "group");
    assert_eq!(chart.y_key, "value");
    assert_eq!(chart.title, "Sales by Product");
}

#[tokio::test]
async fn test_scenario_unrelated_question() {
    let p = pipeline(&[
        r#"{"type":"UNKNOWN","confidence":0.2,"reasoning":"The data has no weather information."}"#,
    ]);
    let resp = p.handle_question("Will it rain tomorrow?", "sales").await;

    assert!(!resp.error);
    assert!(resp.content.contains("not sure how to analyze that"));
    assert!(resp.content.ends_with("The data has no weather information."));
    assert!(resp.sql.is_none());

    let json = serde_json::to_value(&resp).unwrap();
    assert!(json.get("sql").is_none());
    assert_eq!(json["error"], false);

    // no narration call for an unknown intent
    assert_eq!(p.model().requests().len(), 1);
}

#[tokio::test]
async fn test_unknown_without_reasoning_asks_to_rephrase() {
    let p = pipeline(&[r#"{"type":"UNKNOWN","confidence":0,"reasoning":""}"#]);
    let resp = p.handle_question("hmm", "sales").await;
    assert_eq!(
        resp.content,
        "I'm not sure how to analyze that. Could you try asking differently?"
    );
}

#[tokio::test]
async fn test_classifier_outage_is_not_an_error() {
    let p = pipeline(&[]);
    let resp = p.handle_question("What were total Sales?", "sales").await;
    assert!(!resp.error);
    assert!(resp.content.ends_with(CLASSIFICATION_FAILED));
    assert!(resp.sql.is_none());
}

#[tokio::test]
async fn test_hallucinated_column_is_a_compile_error() {
    let p = pipeline(&[
        r#"{"type":"DISTRIBUTION","metricColumn":"Sales","dimensionColumn":"Category","filters":[],"confidence":0.7,"reasoning":"by category"}"#,
    ]);
    let resp = p.handle_question("Breakdown by category", "sales").await;

    assert!(resp.error);
    assert!(resp
        .content
        .starts_with("I understood your intent (DISTRIBUTION) but couldn't construct the query:"));
    assert!(resp.content.contains("Category"));
    assert!(resp.sql.is_none());
}

#[tokio::test]
async fn test_execution_error_carries_sql() {
    // "Sales" only appears from the second row on, so the analytical table lacks it
    let mut source = InMemorySource::new();
    source.insert("sparse", rows(json!([{"Product": "A"}, {"Product": "B", "Sales": 5}])));
    let p = ChatPipeline::new(source, ScriptedModel::new(&[TOTAL_SALES]));

    let resp = p.handle_question("What were total Sales?", "sparse").await;
    assert!(resp.error);
    assert!(resp.content.starts_with("Error executing analysis:"));
    assert!(resp.sql.as_deref().unwrap().contains("\"Sales\""));
}

#[tokio::test]
async fn test_filter_on_late_column_is_an_execution_error() {
    let mut source = InMemorySource::new();
    source.insert(
        "sparse",
        rows(json!([{"Product": "A", "Sales": 1}, {"Product": "B", "Sales": 2, "Region": "North"}])),
    );
    let p = ChatPipeline::new(
        source,
        ScriptedModel::new(&[
            r#"{"type":"AGGREGATE_METRIC","metricColumn":"Sales","aggregateFunction":"SUM","filters":[{"column":"Region","operator":"eq","value":"Region"}],"confidence":0.8,"reasoning":"filtered total"}"#,
        ]),
    );

    let resp = p.handle_question("Sales in region Region?", "sparse").await;
    assert!(resp.error);
    assert!(resp.content.starts_with("Error executing analysis:"));
    assert!(resp.sql.as_deref().unwrap().contains("\"Region\" = 'Region'"));
    assert!(resp.data.is_none());
    // no narration after a failed execution
    assert_eq!(p.model().requests().len(), 1);
}

#[tokio::test]
async fn test_narration_failure_falls_back_to_summary() {
    let p = pipeline(&[TOTAL_SALES]);
    let resp = p.handle_question("What were total Sales?", "sales").await;
    assert!(!resp.error);
    assert_eq!(resp.content, "Result: value = 300.5.");
}

#[tokio::test]
async fn test_filters_and_escaping_reach_the_store() {
    let p = pipeline(&[
        r#"{"type":"AGGREGATE_METRIC","metricColumn":"Sales","aggregateFunction":"COUNT","filters":[{"column":"Product","operator":"contains","value":"WID"},{"column":"Region","operator":"neq","value":"O'Brien"}],"confidence":0.8,"reasoning":"count"}"#,
        "Two widget sales.",
    ]);
    let resp = p.handle_question("How many widget sales?", "sales").await;
    assert!(!resp.error, "{}", resp.content);
    assert!(resp.sql.as_deref().unwrap().contains("'O''Brien'"));
    assert_eq!(resp.data.unwrap()[0]["value"], 2);
}

#[tokio::test]
async fn test_row_cap_applies_before_analysis() {
    let mut cfg = AppConfig::default();
    cfg.analysis.max_rows = 2;
    let mut source = InMemorySource::new();
    source.insert("sales", sales_rows());
    let p = ChatPipeline::with_config(
        source,
        ScriptedModel::new(&[
            r#"{"type":"AGGREGATE_METRIC","metricColumn":"*","aggregateFunction":"COUNT","confidence":0.9,"reasoning":"rows"}"#,
            "Two rows.",
        ]),
        &cfg,
    );

    let resp = p.handle_question("How many rows?", "sales").await;
    assert!(!resp.error, "{}", resp.content);
    assert_eq!(resp.data.unwrap()[0]["value"], 2);
}

#[tokio::test]
async fn test_ownership_and_lookup_failures() {
    let p = pipeline(&[TOTAL_SALES, "ok"]);

    let denied = p.handle_question_as("bob", "What were total Sales?", "private").await;
    assert!(denied.error);
    assert_eq!(denied.content, UNAUTHORIZED);
    assert!(p.model().requests().is_empty());

    let missing = p.handle_question("What were total Sales?", "nope").await;
    assert!(missing.error);
    assert_eq!(missing.content, NOT_FOUND);

    let allowed = p.handle_question_as("alice", "What were total Sales?", "private").await;
    assert!(!allowed.error, "{}", allowed.content);
    assert_ne!(allowed.content, INTERNAL_ERROR);
}

#[tokio::test]
async fn test_empty_dataset_still_answers() {
    let mut source = InMemorySource::new();
    source.insert("empty", vec![]);
    let p = ChatPipeline::new(
        source,
        ScriptedModel::new(&[r#"{"type":"UNKNOWN","confidence":0,"reasoning":"No columns to analyze."}"#]),
    );
    let resp = p.handle_question("What were total Sales?", "empty").await;
    assert!(!resp.error);
    assert!(resp.content.contains("No columns to analyze."));
}
