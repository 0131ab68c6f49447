//! OpenAI chat-completions backed [`AnalysisProvider`].

use crate::analysis::{AnalysisProvider, ErrorAnalysis};
use crate::error::{DoctorError, DoctorResult};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a database expert.";

/// Connection settings for the OpenAI API.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Asks a chat model for an [`ErrorAnalysis`], falling back on any failure.
#[derive(Debug, Clone)]
pub struct OpenAiAnalyzer {
    config: OpenAiConfig,
    http_client: Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: OpenAiConfig) -> DoctorResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Use a caller-provided HTTP client (shared connection pool, proxies, ...).
    pub fn with_client(config: OpenAiConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    async fn try_analyze(&self, error_text: &str, db_type: &str) -> DoctorResult<ErrorAnalysis> {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return Err(DoctorError::analysis("no API key configured"));
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let request_body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(error_text, db_type) },
            ],
            "temperature": self.config.temperature,
        });

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DoctorError::analysis(format!(
                "OpenAI API error (status {status}): {}",
                truncate_chars(error_text.trim(), 512)
            )));
        }

        let response_json: Value = response.json().await?;
        let content = response_json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| DoctorError::analysis("response has no message content"))?;

        parse_analysis(content)
    }
}

#[async_trait::async_trait]
impl AnalysisProvider for OpenAiAnalyzer {
    async fn analyze(&self, error_text: &str, db_type: &str) -> ErrorAnalysis {
        match self.try_analyze(error_text, db_type).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(target: "dbdoctor.analysis", error = %e, "analysis unavailable, using fallback");
                ErrorAnalysis::fallback(error_text)
            }
        }
    }
}

fn build_prompt(error_text: &str, db_type: &str) -> String {
    format!(
        r#"You are a database debugging expert. Analyze this error:

Database Type: {db_type}
User Error: {error_text}

Respond in JSON format:
{{
    "error_category": "connection|query|performance|permissions|other",
    "severity": "low|medium|high|critical",
    "analysis": "Detailed explanation of what's wrong",
    "diagnostic_queries": [
        "SELECT query to investigate the issue",
        "SHOW command to check system status"
    ],
    "potential_causes": ["cause1", "cause2"],
    "recommended_fixes": ["fix1", "fix2"],
    "prevention_tips": ["tip1", "tip2"]
}}
"#
    )
}

/// Parse the model's reply, tolerating a Markdown code fence around the JSON.
fn parse_analysis(content: &str) -> DoctorResult<ErrorAnalysis> {
    let mut body = content.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    serde_json::from_str(body)
        .map_err(|e| DoctorError::analysis(format!("malformed analysis JSON: {e}")))
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
