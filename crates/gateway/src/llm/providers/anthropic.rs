use serde::Deserialize;
use serde_json::{Value, json};

use super::{FrameOutcome, HttpCall, parse_frame_json, require_text, trimmed_base_url};
use crate::llm::classify::error_in_payload;
use crate::llm::gateway::{
    GenerationRequest, ProviderError, ProviderKind, ProviderResponse, StreamDelta, UsageStats,
};
use crate::llm::sse::SseFrame;

const KIND: ProviderKind = ProviderKind::Anthropic;
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires an explicit completion budget.
const MAX_TOKENS: u32 = 4_096;

pub fn messages_url(base_url: &str) -> String {
    let base = trimmed_base_url(base_url);
    if base.ends_with("/v1") {
        format!("{base}/messages")
    } else {
        format!("{base}/v1/messages")
    }
}

pub fn build_call(request: &GenerationRequest, stream: bool) -> HttpCall {
    let url = messages_url(&request.base_url);

    let mut body = json!({
        "model": request.model,
        "max_tokens": MAX_TOKENS,
        "messages": [{ "role": "user", "content": request.user_prompt }],
    });
    if let Some(system) = request.system_instruction() {
        body["system"] = json!(system);
    }
    if stream {
        body["stream"] = json!(true);
    }

    HttpCall {
        log_url: url.clone(),
        url,
        headers: vec![
            ("x-api-key", request.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ],
        body,
    }
}

pub fn parse_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let parsed = MessagesResponse::deserialize(body)
        .map_err(|_| ProviderError::fatal(KIND, "response_json_shape_unexpected"))?;

    let text = parsed
        .content
        .iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    let mut counts = TokenCounts::default();
    if let Some(usage) = parsed.usage {
        counts.observe(&usage);
    }

    Ok(ProviderResponse {
        text: require_text(KIND, text)?,
        usage: counts.into_stats(),
    })
}

/// Usage arrives on several frames (`message_start`, `message_delta`); the last
/// value seen for each counter wins, counts are never summed across frames.
#[derive(Debug, Default)]
pub struct AnthropicStream {
    text: String,
    counts: TokenCounts,
}

impl AnthropicStream {
    pub fn on_frame(&mut self, frame: &SseFrame) -> Result<FrameOutcome, ProviderError> {
        let Some(value) = parse_frame_json(frame) else {
            return Ok(FrameOutcome::default());
        };
        if let Some(error) = error_in_payload(KIND, &value) {
            return Err(error);
        }
        let Ok(event) = StreamEvent::deserialize(&value) else {
            return Ok(FrameOutcome::default());
        };

        let mut usage_changed = false;
        for usage in [
            event.message.as_ref().and_then(|message| message.usage.as_ref()),
            event.usage.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            usage_changed |= self.counts.observe(usage);
        }

        let event_type = event.event_type.as_deref().unwrap_or(frame.event.as_str());
        if event_type == "message_stop" {
            return Ok(FrameOutcome::done());
        }

        let text = event
            .delta
            .and_then(|delta| delta.text)
            .unwrap_or_default();
        self.text.push_str(&text);

        let usage = usage_changed.then(|| self.counts.into_stats());
        if text.is_empty() && usage.is_none() {
            return Ok(FrameOutcome::default());
        }
        Ok(FrameOutcome::delta(StreamDelta { text, usage }))
    }

    pub fn finish(self) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: require_text(KIND, self.text)?,
            usage: self.counts.into_stats(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TokenCounts {
    input: Option<u64>,
    output: Option<u64>,
}

impl TokenCounts {
    fn observe(&mut self, usage: &Usage) -> bool {
        let mut changed = false;
        if let Some(input) = usage.input_tokens {
            changed |= self.input != Some(input);
            self.input = Some(input);
        }
        if let Some(output) = usage.output_tokens {
            changed |= self.output != Some(output);
            self.output = Some(output);
        }
        changed
    }

    fn into_stats(self) -> UsageStats {
        UsageStats::from_counts(self.input, self.output, None)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    message: Option<StreamMessage>,
    delta: Option<StreamTextDelta>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamTextDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
