//! config.rs — Layered application configuration.
//!
//! Lowest to highest precedence: serde defaults, optional `askdata.toml`,
//! `ASKDATA__SECTION__KEY` environment variables, then plain
//! `OPENROUTER_API_KEY` for the API key.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    // ── OpenRouter (primary) ─────────────────────────────
    /// Prefer env `OPENROUTER_API_KEY`.
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,

    // ── Local fallback (Ollama / llama.cpp / LM Studio) ──
    /// e.g. "http://localhost:11434/v1"
    pub local_base_url: Option<String>,
    pub local_model: String,

    /// Per-request deadline for both classification and narration.
    pub timeout_secs: u64,
    pub classify_max_tokens: u32,
    pub narrate_max_tokens: u32,
    pub narrate_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            openrouter_model: "google/gemini-2.0-flash-001".into(),
            local_base_url: None,
            local_model: "llama3.1:8b".into(),
            timeout_secs: 30,
            classify_max_tokens: 1024,
            narrate_max_tokens: 2048,
            narrate_temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rows beyond this are dropped before profiling and loading.
    pub max_rows: usize,
    /// Rows handed to the profiler.
    pub sample_rows: usize,
    pub table_name: String,
    /// How much of the JSON result the narration prompt sees.
    pub narration_preview_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_rows: 5000,
            sample_rows: 5,
            table_name: crate::query_compiler::DEFAULT_TABLE.into(),
            narration_preview_chars: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Defaults to `<data dir>/askdata/logs`.
    pub directory: Option<String>,
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: None,
            file: true,
        }
    }
}

pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    dotenvy::dotenv().ok();

    let cfg = config::Config::builder()
        .add_source(config::File::with_name("askdata").required(false))
        .add_source(
            config::Environment::with_prefix("ASKDATA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;

    // Convenience: OPENROUTER_API_KEY without the ASKDATA__ prefix
    if app.llm.openrouter_api_key.is_none() {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            app.llm.openrouter_api_key = Some(key);
        }
    }

    Ok(app)
}

pub fn default_config() -> AppConfig {
    AppConfig::default()
}
