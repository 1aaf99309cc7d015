use serde::Deserialize;
use serde_json::Value;

use super::gateway::{ProviderError, ProviderErrorKind, ProviderKind};

const OVERLOADED_STATUSES: [u16; 2] = [503, 529];
const RETRYABLE_STATUSES: [u16; 7] = [408, 429, 500, 502, 503, 504, 529];
const OVERLOADED_CODES: [&str; 2] = ["UNAVAILABLE", "MODEL_OVERLOADED"];
const OVERLOADED_PHRASES: [&str; 3] = [
    "model is overloaded",
    "overloaded",
    "temporarily unavailable",
];
const MAX_BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub overloaded: bool,
}

/// Rules apply in order; an overloaded error is always retryable.
pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> Classification {
    let message = message.to_lowercase();

    let overloaded = status.is_some_and(|status| OVERLOADED_STATUSES.contains(&status))
        || (status == Some(429) && message.contains("overload"))
        || code.is_some_and(|code| {
            OVERLOADED_CODES.contains(&code.trim().to_ascii_uppercase().as_str())
        })
        || OVERLOADED_PHRASES
            .iter()
            .any(|phrase| message.contains(phrase));
    let retryable =
        overloaded || status.is_some_and(|status| RETRYABLE_STATUSES.contains(&status));

    Classification {
        retryable,
        overloaded,
    }
}

/// Builds the uniform error for a provider-reported failure, either a non-2xx
/// response or an error object inside a 2xx body or stream frame.
pub fn provider_error(
    provider: ProviderKind,
    status: Option<u16>,
    code: Option<String>,
    message: String,
) -> ProviderError {
    let classification = classify(status, code.as_deref(), &message);
    let kind = if classification.overloaded {
        ProviderErrorKind::Overloaded
    } else if status == Some(429) {
        ProviderErrorKind::RateLimited
    } else if status == Some(408) {
        ProviderErrorKind::TransportTimeout
    } else if classification.retryable {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::ProviderFatal
    };

    ProviderError {
        kind,
        message,
        http_status: status,
        provider: Some(provider),
        retryable: classification.retryable,
        overloaded: classification.overloaded,
        code,
    }
}

pub fn error_from_response(provider: ProviderKind, status: u16, body: &str) -> ProviderError {
    let payload = serde_json::from_str::<Value>(body)
        .map(|value| parse_error_payload(&value))
        .unwrap_or_default();

    let message = payload.message.unwrap_or_else(|| {
        let excerpt = body.trim().chars().take(MAX_BODY_EXCERPT_CHARS).collect::<String>();
        if excerpt.is_empty() {
            format!("status={status}")
        } else {
            format!("status={status} body={excerpt}")
        }
    });

    provider_error(provider, Some(status), payload.code, message)
}

/// Returns the embedded error when a parsed body or stream frame carries one.
pub fn error_in_payload(provider: ProviderKind, value: &Value) -> Option<ProviderError> {
    let envelope = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let is_error = envelope.get("error").is_some_and(|error| !error.is_null())
        || envelope.get("type").and_then(Value::as_str) == Some("error");
    if !is_error {
        return None;
    }

    let payload = parse_error_payload(envelope);
    let status = envelope
        .get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (400..600).contains(code));

    Some(provider_error(
        provider,
        status,
        payload.code,
        payload
            .message
            .unwrap_or_else(|| "provider reported an error".to_string()),
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: Option<String>,
    pub code: Option<String>,
}

/// Reads the three vendor error envelopes:
/// OpenAI `{"error":{"message","type","code"}}`,
/// Anthropic `{"type":"error","error":{"type","message"}}` and
/// Google `{"error":{"code","message","status"}}`.
pub fn parse_error_payload(value: &Value) -> ErrorPayload {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: Option<Value>,
        message: Option<String>,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        message: Option<String>,
        status: Option<String>,
        code: Option<Value>,
        #[serde(rename = "type")]
        error_type: Option<String>,
    }

    let value = match value {
        Value::Array(items) => items.first().unwrap_or(value),
        other => other,
    };
    let Ok(envelope) = ErrorEnvelope::deserialize(value) else {
        return ErrorPayload::default();
    };

    match envelope.error {
        Some(Value::String(message)) => ErrorPayload {
            message: Some(message),
            code: None,
        },
        Some(details @ Value::Object(_)) => {
            let Ok(details) = ErrorDetails::deserialize(&details) else {
                return ErrorPayload::default();
            };
            let code = details
                .status
                .or_else(|| match details.code {
                    Some(Value::String(code)) => Some(code),
                    Some(Value::Number(code)) => Some(code.to_string()),
                    _ => None,
                })
                .or(details.error_type)
                .filter(|code| !code.trim().is_empty());

            ErrorPayload {
                message: details.message.filter(|message| !message.trim().is_empty()),
                code,
            }
        }
        _ => ErrorPayload {
            message: envelope.message,
            code: None,
        },
    }
}
