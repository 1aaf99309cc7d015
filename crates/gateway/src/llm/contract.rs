use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use super::gateway::{GatewayError, GenerationRequest, ProviderTransport, UsageStats};
use super::prompts::{CONTRACT_REPAIR_SYSTEM_INSTRUCTION, contract_repair_prompt};

pub const MIN_HANDOFF_PROMPT_CHARS: usize = 40;
const HANDOFF_PREFIXES: [&str; 2] = ["du bist", "you are"];
const HANDOFF_KEYS: [&str; 4] = ["handoff_prompt", "handoffPrompt", "prompt", "final_prompt"];
const MAX_RAW_EXCERPT_CHARS: usize = 200;
/// Opening used when local sanitisation leaves no valid one. Satisfies the
/// prefix and length rules on its own.
const DEFAULT_OPENING: &str = "Du bist ein geduldiger Lernbegleiter für Schülerinnen und Schüler.";

/// Trimmed text of at least 40 characters that opens with "Du bist" or
/// "You are" (case-insensitive). Only this type leaves the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPrompt(String);

impl HandoffPrompt {
    pub fn parse(candidate: &str) -> Option<Self> {
        let trimmed = candidate.trim();
        if trimmed.chars().count() < MIN_HANDOFF_PROMPT_CHARS {
            return None;
        }

        let lowered = trimmed.to_lowercase();
        HANDOFF_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
            .then(|| Self(trimmed.to_string()))
    }

    /// Prepends [`DEFAULT_OPENING`] to `body`; valid whatever `body` holds.
    pub(crate) fn with_default_opening(body: &str) -> Self {
        let body = body.trim();
        if body.is_empty() {
            Self(DEFAULT_OPENING.to_string())
        } else {
            Self(format!("{DEFAULT_OPENING}\n{body}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for HandoffPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HandoffPrompt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractResolution {
    pub prompt: HandoffPrompt,
    pub repaired: bool,
    pub repair_usage: UsageStats,
}

/// Local extraction without any provider call: JSON field, then JSON inside a
/// code fence, then the fence-stripped text itself.
pub fn extract_handoff_prompt(raw: &str) -> Option<HandoffPrompt> {
    let trimmed = raw.trim();
    if let Some(prompt) = prompt_from_json(trimmed) {
        return Some(prompt);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Some(prompt) = prompt_from_json(unfenced) {
        return Some(prompt);
    }

    HandoffPrompt::parse(unfenced)
}

/// Removes one surrounding Markdown fence (```lang ... ```). Text without a
/// complete fence is returned unchanged.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = after_open.strip_suffix("```") else {
        return trimmed;
    };

    match inner.split_once('\n') {
        // The first line is the info string, e.g. `json`.
        Some((info, body)) if !info.trim().contains(char::is_whitespace) => body.trim(),
        _ => inner.trim(),
    }
}

fn prompt_from_json(candidate: &str) -> Option<HandoffPrompt> {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(candidate) else {
        return None;
    };

    HANDOFF_KEYS
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .find_map(HandoffPrompt::parse)
}

/// Validates `raw`, issuing exactly one repair call to the same provider and
/// model when local extraction fails.
pub async fn enforce_contract<T>(
    transport: &T,
    request: &GenerationRequest,
    raw: &str,
) -> Result<ContractResolution, GatewayError>
where
    T: ProviderTransport + ?Sized,
{
    if let Some(prompt) = extract_handoff_prompt(raw) {
        return Ok(ContractResolution {
            prompt,
            repaired: false,
            repair_usage: UsageStats::default(),
        });
    }

    info!(
        provider = %request.provider_kind,
        model = %request.model,
        raw_chars = raw.chars().count(),
        "model output is not a valid handoff prompt; issuing repair call"
    );

    let repair_request = request.with_prompts(
        CONTRACT_REPAIR_SYSTEM_INSTRUCTION,
        contract_repair_prompt(&request.user_prompt, raw),
    );
    let repaired = transport
        .call_once(&repair_request)
        .await
        .map_err(|err| {
            // Capacity problems keep their own classification for user messaging.
            if err.overloaded {
                GatewayError::Provider(err)
            } else {
                GatewayError::ContractViolation {
                    message: format!("repair call failed: {}", err.message),
                    raw_excerpt: excerpt(raw),
                }
            }
        })?;

    match extract_handoff_prompt(&repaired.text) {
        Some(prompt) => Ok(ContractResolution {
            prompt,
            repaired: true,
            repair_usage: repaired.usage,
        }),
        None => {
            warn!(
                provider = %request.provider_kind,
                model = %request.model,
                "repair call did not produce a valid handoff prompt"
            );
            Err(GatewayError::ContractViolation {
                message: "model did not produce a valid handoff prompt after one repair attempt"
                    .to_string(),
                raw_excerpt: excerpt(&repaired.text),
            })
        }
    }
}

fn excerpt(text: &str) -> String {
    text.trim().chars().take(MAX_RAW_EXCERPT_CHARS).collect()
}
