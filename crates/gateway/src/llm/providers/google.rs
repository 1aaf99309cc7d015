use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{FrameOutcome, HttpCall, parse_frame_json, require_text, trimmed_base_url};
use crate::llm::classify::error_in_payload;
use crate::llm::gateway::{
    GenerationRequest, ProviderError, ProviderKind, ProviderResponse, StreamDelta, UsageStats,
};
use crate::llm::sse::SseFrame;

const KIND: ProviderKind = ProviderKind::Google;

pub fn build_call(request: &GenerationRequest, stream: bool) -> Result<HttpCall, ProviderError> {
    let method = if stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let model = request.model.trim().trim_start_matches("models/");
    let endpoint = format!(
        "{}/models/{model}:{method}",
        trimmed_base_url(&request.base_url)
    );

    let mut url = Url::parse(&endpoint)
        .map_err(|err| ProviderError::fatal(KIND, format!("invalid endpoint url: {err}")))?;
    if stream {
        url.query_pairs_mut().append_pair("alt", "sse");
    }
    let log_url = url.to_string();
    url.query_pairs_mut().append_pair("key", &request.api_key);

    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.user_prompt }] }],
    });
    if let Some(system) = request.system_instruction() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    Ok(HttpCall {
        url: url.to_string(),
        log_url,
        headers: Vec::new(),
        body,
    })
}

pub fn parse_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let parsed = GenerateContentResponse::deserialize(body)
        .map_err(|_| ProviderError::fatal(KIND, "response_json_shape_unexpected"))?;

    Ok(ProviderResponse {
        text: require_text(KIND, parsed.candidate_text())?,
        usage: parsed
            .usage_metadata
            .map(UsageMetadata::into_stats)
            .unwrap_or_default(),
    })
}

/// Gemini stream frames carry the whole text generated so far. Each snapshot
/// is diffed against what was already emitted so callers only see new text.
#[derive(Debug, Default)]
pub struct GoogleStream {
    text: String,
    usage: Option<UsageStats>,
}

impl GoogleStream {
    pub fn on_frame(&mut self, frame: &SseFrame) -> Result<FrameOutcome, ProviderError> {
        let Some(value) = parse_frame_json(frame) else {
            return Ok(FrameOutcome::default());
        };
        if let Some(error) = error_in_payload(KIND, &value) {
            return Err(error);
        }
        let Ok(chunk) = GenerateContentResponse::deserialize(&value) else {
            return Ok(FrameOutcome::default());
        };

        let usage = chunk
            .usage_metadata
            .as_ref()
            .filter(|metadata| metadata.has_counts())
            .map(UsageMetadata::stats);
        if usage.is_some() {
            self.usage = usage;
        }

        let text = self.advance(&chunk.candidate_text()).unwrap_or_default();
        if text.is_empty() && usage.is_none() {
            return Ok(FrameOutcome::default());
        }
        Ok(FrameOutcome::delta(StreamDelta { text, usage }))
    }

    /// Returns the newly appended suffix, if any. A snapshot no longer than the
    /// accumulated text emits nothing. A snapshot that does not extend the
    /// accumulated text also emits nothing: it becomes the new base, so later
    /// snapshots are diffed against it and no fragment of either text is sent.
    pub(crate) fn advance(&mut self, snapshot: &str) -> Option<String> {
        if snapshot.len() <= self.text.len() {
            return None;
        }

        let Some(suffix) = snapshot.strip_prefix(self.text.as_str()) else {
            debug!(
                emitted_bytes = self.text.len(),
                common_prefix_bytes = common_prefix_len(&self.text, snapshot),
                "gemini snapshot diverged from emitted text; rebasing"
            );
            self.text = snapshot.to_string();
            return None;
        };
        let delta = suffix.to_string();
        self.text = snapshot.to_string();

        (!delta.is_empty()).then_some(delta)
    }

    pub fn finish(self) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: require_text(KIND, self.text)?,
            usage: self.usage.unwrap_or_default(),
        })
    }
}

/// Byte length of the longest common prefix, always on a char boundary of both.
fn common_prefix_len(left: &str, right: &str) -> usize {
    left.char_indices()
        .zip(right.chars())
        .find(|((_, left_char), right_char)| left_char != right_char)
        .map(|((index, _), _)| index)
        .unwrap_or_else(|| left.len().min(right.len()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn candidate_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

impl UsageMetadata {
    fn has_counts(&self) -> bool {
        [
            self.prompt_token_count,
            self.candidates_token_count,
            self.total_token_count,
        ]
        .into_iter()
        .flatten()
        .any(|count| count > 0)
    }

    fn stats(&self) -> UsageStats {
        UsageStats::from_counts(
            self.prompt_token_count,
            self.candidates_token_count,
            self.total_token_count,
        )
    }

    fn into_stats(self) -> UsageStats {
        self.stats()
    }
}
