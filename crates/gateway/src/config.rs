use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::llm::gateway::{MIN_TIMEOUT_MS, ProviderKind};
use crate::llm::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {key}: {value}")]
    ParseInt { key: String, value: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
    #[error("failed to build provider http client: {0}")]
    HttpClient(String),
}

/// Static settings shared by every generation call. Nothing here changes per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub pipeline_deadline_ms: Option<u64>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub google_base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            pipeline_deadline_ms: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            google_base_url: DEFAULT_GOOGLE_BASE_URL.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| optional_trimmed(lookup(key));

        let timeout_ms = parse_u64(
            "GENERATION_TIMEOUT_MS",
            optional("GENERATION_TIMEOUT_MS"),
            DEFAULT_TIMEOUT_MS,
        )?
        .max(MIN_TIMEOUT_MS);
        let max_attempts = parse_u32(
            "GENERATION_MAX_ATTEMPTS",
            optional("GENERATION_MAX_ATTEMPTS"),
            DEFAULT_MAX_ATTEMPTS,
        )?;
        let retry_base_delay_ms = parse_u64(
            "GENERATION_RETRY_BASE_DELAY_MS",
            optional("GENERATION_RETRY_BASE_DELAY_MS"),
            DEFAULT_BASE_DELAY_MS,
        )?;
        let pipeline_deadline_ms = parse_u64(
            "GENERATION_PIPELINE_DEADLINE_MS",
            optional("GENERATION_PIPELINE_DEADLINE_MS"),
            0,
        )?;

        let config = Self {
            timeout_ms,
            max_attempts,
            retry_base_delay_ms,
            pipeline_deadline_ms: (pipeline_deadline_ms > 0).then_some(pipeline_deadline_ms),
            openai_base_url: optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            anthropic_base_url: optional("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            google_base_url: optional("GOOGLE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GOOGLE_BASE_URL.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "GENERATION_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        for (key, value) in [
            ("OPENAI_BASE_URL", &self.openai_base_url),
            ("ANTHROPIC_BASE_URL", &self.anthropic_base_url),
            ("GOOGLE_BASE_URL", &self.google_base_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }

        Ok(())
    }

    pub fn default_base_url(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::OpenAiCompatible => &self.openai_base_url,
            ProviderKind::Anthropic => &self.anthropic_base_url,
            ProviderKind::Google => &self.google_base_url,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn pipeline_deadline(&self) -> Option<Duration> {
        self.pipeline_deadline_ms.map(Duration::from_millis)
    }
}

/// Loads `.env` from the working directory when present. A missing file is not an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

pub fn require_non_empty_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed(env::var(key).ok()).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn optional_trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u64(key: &str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(value) => value.parse::<u64>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn parse_u32(key: &str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match raw {
        Some(value) => value.parse::<u32>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
