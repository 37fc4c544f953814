use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use askdata::config::{self, AppConfig};
use askdata::data_source::{DataSource, JsonDirSource};
use askdata::insights::{dataset_overview, format_insights_for_prompt};
use askdata::intent::Intent;
use askdata::query_compiler::{Dialect, QueryCompiler};
use askdata::schema_profile::{profile_sample, ColumnSchema, Row};
use askdata::suggestions::suggest_questions;
use askdata::{logging, ChatPipeline, LlmClient};

#[derive(Parser)]
#[command(name = "askdata", version)]
#[command(about = "Ask questions about a table in plain language")]
struct Cli {
    /// Directory holding <source-id>.json files
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question about a data source
    Ask {
        source_id: String,
        question: String,
        /// Only answer if this user owns the source
        #[arg(long)]
        user: Option<String>,
    },

    /// Suggest starter questions for a data source
    Suggest { source_id: String },

    /// Headline statistics and chart recommendations for a data source
    Insights {
        source_id: String,
        /// Print the prompt-ready text form instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Compile an intent (JSON file, or - for stdin) against a data source's schema
    Compile {
        source_id: String,
        intent: PathBuf,
        #[arg(long, value_enum, default_value = "direct-column")]
        dialect: DialectArg,
        /// Scope json-document queries to this data_source_id
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DialectArg {
    DirectColumn,
    JsonDocument,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::DirectColumn => Dialect::DirectColumn,
            DialectArg::JsonDocument => Dialect::JsonDocument,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().unwrap_or_else(|e| {
        eprintln!("[askdata][WARN] Config load failed ({}), using defaults", e);
        config::default_config()
    });
    logging::init_logging(&cfg.logging);

    let source = JsonDirSource::new(&cli.data_dir);

    match cli.command {
        Command::Ask {
            source_id,
            question,
            user,
        } => {
            let pipeline = ChatPipeline::with_config(source, LlmClient::from_config(&cfg.llm), &cfg);
            let response = match user {
                Some(user) => pipeline.handle_question_as(&user, &question, &source_id).await,
                None => pipeline.handle_question(&question, &source_id).await,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Suggest { source_id } => {
            let (_, schema) = load_schema(&source, &source_id, &cfg).await?;
            let questions = suggest_questions(&schema);
            println!("{}", serde_json::to_string_pretty(&json!({ "questions": questions }))?);
        }

        Command::Insights { source_id, text } => {
            let (rows, schema) = load_schema(&source, &source_id, &cfg).await?;
            let overview = dataset_overview(&rows, &schema);
            if text {
                println!("{}", format_insights_for_prompt(&overview.insights));
            } else {
                println!("{}", serde_json::to_string_pretty(&overview)?);
            }
        }

        Command::Compile {
            source_id,
            intent,
            dialect,
            scope,
        } => {
            let (_, schema) = load_schema(&source, &source_id, &cfg).await?;
            let raw = if intent.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin()).context("reading intent from stdin")?
            } else {
                tokio::fs::read_to_string(&intent)
                    .await
                    .with_context(|| format!("reading {}", intent.display()))?
            };
            let intent = Intent::from_json(&raw)?;

            let mut compiler = QueryCompiler::new(&schema);
            if let Some(scope) = scope {
                compiler = compiler.with_source_id(scope);
            }
            let compiled = compiler.compile(&intent, dialect.into())?;
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
    }
    Ok(())
}

/// Rows (capped at `max_rows`) and their profiled schema.
async fn load_schema(
    source: &JsonDirSource,
    source_id: &str,
    cfg: &AppConfig,
) -> Result<(Vec<Row>, ColumnSchema)> {
    let mut rows = source
        .fetch_rows(source_id)
        .await
        .with_context(|| format!("loading {} from {}", source_id, source.dir().display()))?;
    rows.truncate(cfg.analysis.max_rows);

    let schema = profile_sample(&rows, cfg.analysis.sample_rows);
    Ok((rows, schema))
}
