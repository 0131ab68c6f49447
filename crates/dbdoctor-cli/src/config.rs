use crate::cli::ConfigPath;
use dbdoctor::openai::{self, OpenAiConfig};
use dbdoctor::{DoctorConfig, SafetyPolicy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,

    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            database: None,
            limits: LimitsConfig::default(),
            safety: SafetyConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    pub max_rows: Option<usize>,
    /// `0` disables the timeout.
    pub query_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyConfig {
    pub allowed_commands: Option<Vec<String>>,
    pub denied_keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Load the config file, or fall back to defaults when the default path does not exist.
    pub fn load(config: &ConfigPath) -> anyhow::Result<Self> {
        if !config.explicit && !config.path.exists() {
            tracing::debug!(path = %config.path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        Self::load_file(&config.path)
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        Self::parse(&raw)
            .map_err(|e| anyhow::anyhow!("failed to load config file {}: {e:#}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut file: ConfigFile = toml::from_str(raw)?;
        file.expand_env()?;
        file.validate()?;
        Ok(file)
    }

    fn expand_env(&mut self) -> anyhow::Result<()> {
        if let Some(db) = self.database.as_mut() {
            db.url = expand_env_vars(&db.url)?;
        }

        for list in [
            self.safety.allowed_commands.as_mut(),
            self.safety.denied_keywords.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            for s in list {
                *s = expand_env_vars(s)?;
            }
        }

        let analysis = &mut self.analysis;
        for field in [
            analysis.api_key.as_mut(),
            analysis.base_url.as_mut(),
            analysis.model.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            *field = expand_env_vars(field)?;
        }

        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.version.trim() != "1" {
            anyhow::bail!("unsupported config version: {}", self.version);
        }

        if let Some(db) = &self.database {
            if db.url.trim().is_empty() {
                anyhow::bail!("database.url must not be empty");
            }
        }

        if self.limits.max_rows == Some(0) {
            anyhow::bail!("limits.max_rows must be at least 1");
        }

        if let Some(allowed) = &self.safety.allowed_commands {
            if allowed.iter().all(|s| s.trim().is_empty()) {
                anyhow::bail!("safety.allowed_commands must name at least one command");
            }
        }

        if let Some(t) = self.analysis.temperature {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("analysis.temperature must be between 0 and 2, got {t}");
            }
        }

        Ok(())
    }

    /// `--database` wins over the config file, which wins over `DATABASE_URL`.
    pub fn database_url(&self, cli_override: Option<&str>) -> Option<String> {
        cli_override
            .map(str::to_string)
            .or_else(|| self.database.as_ref().map(|db| db.url.clone()))
            .or_else(|| non_empty_env(DATABASE_URL_ENV))
    }

    pub fn safety_policy(&self) -> SafetyPolicy {
        let mut policy = SafetyPolicy::default();
        if let Some(allowed) = &self.safety.allowed_commands {
            policy = policy.allowed_commands(allowed);
        }
        if let Some(denied) = &self.safety.denied_keywords {
            policy = policy.denied_keywords(denied);
        }
        policy
    }

    pub fn doctor_config(&self) -> DoctorConfig {
        let mut config = DoctorConfig::new().safety(self.safety_policy());
        if let Some(max_rows) = self.limits.max_rows {
            config = config.max_rows(max_rows);
        }
        config = apply_timeout(config, self.limits.query_timeout_secs);
        config
    }

    /// `None` when no API key is configured anywhere.
    pub fn openai_config(&self) -> Option<OpenAiConfig> {
        let api_key = self
            .analysis
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| non_empty_env(OPENAI_API_KEY_ENV))?;

        let a = &self.analysis;
        Some(
            OpenAiConfig::new(api_key)
                .base_url(a.base_url.as_deref().unwrap_or(openai::DEFAULT_BASE_URL))
                .model(a.model.as_deref().unwrap_or(openai::DEFAULT_MODEL))
                .temperature(a.temperature.unwrap_or(openai::DEFAULT_TEMPERATURE))
                .request_timeout(
                    a.timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(openai::DEFAULT_REQUEST_TIMEOUT),
                ),
        )
    }
}

/// `Some(0)` disables the timeout; `None` keeps the current one.
pub fn apply_timeout(config: DoctorConfig, secs: Option<u64>) -> DoctorConfig {
    match secs {
        None => config,
        Some(0) => config.no_timeout(),
        Some(secs) => config.timeout(Duration::from_secs(secs)),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn expand_env_vars(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                anyhow::bail!("unterminated env var reference: ${{{key}}}");
            }
            if key.is_empty() {
                anyhow::bail!("invalid env var reference: ${{}}");
            }

            let v = std::env::var(&key)
                .map_err(|_| anyhow::anyhow!("missing env var for config expansion: {key}"))?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}
