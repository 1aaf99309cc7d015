use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound calls never get less than this, whatever the caller configured.
pub const MIN_TIMEOUT_MS: u64 = 5_000;

pub const OVERLOADED_USER_MESSAGE: &str =
    "The model is busy right now. Please try again in a moment.";

pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenAiCompatible,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai-compatible",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" | "mistral" => {
                Ok(Self::OpenAiCompatible)
            }
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            _ => Err(ProviderError::unsupported_provider_kind(raw)),
        }
    }
}

#[derive(Clone)]
pub struct GenerationRequest {
    pub provider_kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub system_instruction: Option<String>,
    pub user_prompt: String,
    pub timeout_ms: u64,
}

impl GenerationRequest {
    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_deref()
            .map(str::trim)
            .filter(|instruction| !instruction.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(MIN_TIMEOUT_MS))
    }

    /// Same provider, model and credentials with different prompts. Used for repair calls.
    pub fn with_prompts(&self, system_instruction: &str, user_prompt: String) -> Self {
        Self {
            system_instruction: Some(system_instruction.to_string()),
            user_prompt,
            ..self.clone()
        }
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("provider_kind", &self.provider_kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[redacted]")
            .field("system_instruction", &self.system_instruction)
            .field("user_prompt", &self.user_prompt)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl UsageStats {
    /// Missing totals fall back to `prompt + completion`.
    pub fn from_counts(prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> Self {
        let prompt_tokens = clamp_u64_to_u32(prompt.unwrap_or(0));
        let completion_tokens = clamp_u64_to_u32(completion.unwrap_or(0));
        let total_tokens = match total {
            Some(total) if total > 0 => clamp_u64_to_u32(total),
            _ => prompt_tokens.saturating_add(completion_tokens),
        };

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn accumulate(&mut self, other: UsageStats) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    pub text: String,
    pub usage: Option<UsageStats>,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    pub fn usage(usage: UsageStats) -> Self {
        Self {
            text: String::new(),
            usage: Some(usage),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: UsageStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    TransportTimeout,
    Overloaded,
    RateLimited,
    /// Retryable failure that is neither a timeout, an overload nor rate limiting.
    Transient,
    ProviderFatal,
    UnsupportedProviderKind,
}

impl ProviderErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransportTimeout => "transport_timeout",
            Self::Overloaded => "overloaded",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::ProviderFatal => "provider_fatal",
            Self::UnsupportedProviderKind => "unsupported_provider_kind",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("llm provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub provider: Option<ProviderKind>,
    pub retryable: bool,
    pub overloaded: bool,
    pub code: Option<String>,
}

impl ProviderError {
    pub fn timeout(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::TransportTimeout,
            message: message.into(),
            http_status: Some(408),
            provider: Some(provider),
            retryable: true,
            overloaded: false,
            code: None,
        }
    }

    /// Connection refused, reset or a broken body stream.
    pub fn transport(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
            http_status: None,
            provider: Some(provider),
            retryable: true,
            overloaded: false,
            code: None,
        }
    }

    pub fn fatal(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::ProviderFatal,
            message: message.into(),
            http_status: None,
            provider: Some(provider),
            retryable: false,
            overloaded: false,
            code: None,
        }
    }

    pub fn unsupported_provider_kind(raw: &str) -> Self {
        Self {
            kind: ProviderErrorKind::UnsupportedProviderKind,
            message: format!("unsupported provider kind '{}'", raw.trim()),
            http_status: None,
            provider: None,
            retryable: false,
            overloaded: false,
            code: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("model output violated the handoff prompt contract: {message}")]
    ContractViolation {
        message: String,
        raw_excerpt: String,
    },
    #[error("generation pipeline exceeded its deadline of {deadline_ms}ms")]
    DeadlineExceeded { deadline_ms: u64 },
}

impl GatewayError {
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::Provider(err) if err.overloaded)
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Provider(err) => err.kind.as_str(),
            Self::ContractViolation { .. } => "contract_violation",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    /// HTTP-like status for the caller's response mapping.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Provider(err) if err.overloaded => 503,
            Self::Provider(err) => match err.kind {
                ProviderErrorKind::RateLimited => 429,
                ProviderErrorKind::TransportTimeout => 504,
                ProviderErrorKind::UnsupportedProviderKind => 400,
                _ => 502,
            },
            Self::ContractViolation { .. } => 502,
            Self::DeadlineExceeded { .. } => 504,
        }
    }

    /// Overload is normalised to one generic message; everything else keeps its detail.
    pub fn user_message(&self) -> String {
        if self.is_overloaded() {
            OVERLOADED_USER_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Receiving end of streamed text. Counts delivered text deltas so the retry
/// loop can tell whether the caller has already started consuming output.
#[derive(Debug, Default)]
pub struct DeltaSink {
    sender: Option<mpsc::UnboundedSender<StreamDelta>>,
    delivered: usize,
}

impl DeltaSink {
    pub fn new(sender: mpsc::UnboundedSender<StreamDelta>) -> Self {
        Self {
            sender: Some(sender),
            delivered: 0,
        }
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: StreamDelta) {
        if delta.text.is_empty() && delta.usage.is_none() {
            return;
        }
        if !delta.text.is_empty() {
            self.delivered += 1;
        }

        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(delta).is_err() {
            debug!("stream receiver dropped; continuing generation without forwarding deltas");
            self.sender = None;
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

pub trait ProviderTransport: Send + Sync {
    fn call_once<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a>;

    fn call_once_streaming<'a>(
        &'a self,
        request: &'a GenerationRequest,
        sink: &'a mut DeltaSink,
    ) -> ProviderFuture<'a>;
}

pub(crate) fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}
