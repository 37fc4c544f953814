//! llm.rs — Chat-completions client with OpenRouter primary and local fallback.
//!
//! OpenRouter speaks the OpenAI `/chat/completions` protocol, as do Ollama,
//! llama.cpp and LM Studio, so both providers share one request path.
//!
//! The pipeline only sees the `LanguageModel` trait; tests script it.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("No LLM provider available")]
    NoProvider,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected LLM response: {0}")]
    MalformedResponse(String),
    #[error("LLM returned an empty response")]
    EmptyResponse,
}

// ── Provider config ──────────────────────────────────

#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// https://openrouter.ai
    OpenRouter { api_key: String, model: String },
    /// Any local OpenAI-compatible server
    Local { base_url: String, model: String },
}

impl LlmProvider {
    pub fn label(&self) -> String {
        match self {
            LlmProvider::OpenRouter { model, .. } => format!("OpenRouter/{}", model),
            LlmProvider::Local { model, .. } => format!("Local/{}", model),
        }
    }

    fn endpoint(&self) -> (String, &str, String) {
        match self {
            LlmProvider::OpenRouter { api_key, model } => {
                (OPENROUTER_URL.to_string(), model, format!("Bearer {}", api_key))
            }
            LlmProvider::Local { base_url, model } => (
                format!("{}/chat/completions", base_url.trim_end_matches('/')),
                model,
                // Ollama ignores auth
                "Bearer local".to_string(),
            ),
        }
    }
}

// ── Request types ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: 1024,
            temperature: 0.2,
            json_mode: false,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    fn body(&self, model: &str) -> Value {
        let mut body = json!({
            "model": model,
            "messages": self.messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if self.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

/// A text-completion backend.
pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

// ── Client ───────────────────────────────────────────

pub struct LlmClient {
    http: Client,
    primary: Option<LlmProvider>,
    fallback: Option<LlmProvider>,
}

impl LlmClient {
    /// Primary = OpenRouter (if a key is set), fallback = local server (if configured).
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let primary = cfg
            .openrouter_api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|key| LlmProvider::OpenRouter {
                api_key: key.clone(),
                model: cfg.openrouter_model.clone(),
            });

        let fallback = cfg
            .local_base_url
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|url| LlmProvider::Local {
                base_url: url.clone(),
                model: cfg.local_model.clone(),
            });

        if primary.is_none() && fallback.is_none() {
            warn!("No LLM provider configured; every question will be answered as UNKNOWN");
        } else {
            info!("LLM primary:  {}", primary.as_ref().map(|p| p.label()).unwrap_or("none".into()));
            info!("LLM fallback: {}", fallback.as_ref().map(|p| p.label()).unwrap_or("none".into()));
        }

        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .expect("reqwest client"),
            primary,
            fallback,
        }
    }

    pub fn active_provider_label(&self) -> String {
        self.primary
            .as_ref()
            .or(self.fallback.as_ref())
            .map(|p| p.label())
            .unwrap_or("none".into())
    }

    /// Try primary provider, fall back to local on error.
    async fn call_with_fallback(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Some(ref primary) = self.primary {
            match self.call_provider(primary, request).await {
                Ok(r) => return Ok(r),
                Err(e) => warn!("Primary LLM failed: {}; trying fallback", e),
            }
        }

        if let Some(ref fallback) = self.fallback {
            return self.call_provider(fallback, request).await;
        }

        Err(LlmError::NoProvider)
    }

    async fn call_provider(
        &self,
        provider: &LlmProvider,
        request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        let (url, model, auth) = provider.endpoint();
        debug!(provider = %provider.label(), json_mode = request.json_mode, "LLM call → {}", url);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            // OpenRouter uses these to identify the app
            .header("HTTP-Referer", "https://github.com/wronai/askdata")
            .header("X-Title", "askdata")
            .json(&request.body(model))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status,
                body: body.chars().take(300).collect(),
            });
        }

        let json: Value = resp.json().await?;
        extract_content(&json)
    }
}

impl LanguageModel for LlmClient {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        async move { self.call_with_fallback(&request).await }
    }
}

/// `choices[0].message.content` of an OpenAI-compatible response.
fn extract_content(json: &Value) -> Result<String, LlmError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::MalformedResponse(json.to_string().chars().take(300).collect()))?;
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content.to_string())
}
