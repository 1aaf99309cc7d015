use serde::Deserialize;
use serde_json::{Value, json};

use super::{FrameOutcome, HttpCall, parse_frame_json, require_text, trimmed_base_url};
use crate::llm::classify::error_in_payload;
use crate::llm::gateway::{
    GenerationRequest, ProviderError, ProviderKind, ProviderResponse, StreamDelta, UsageStats,
};
use crate::llm::sse::SseFrame;

const KIND: ProviderKind = ProviderKind::OpenAiCompatible;
const TEMPERATURE: f64 = 0.2;
const DONE_SENTINEL: &str = "[DONE]";

pub fn build_call(request: &GenerationRequest, stream: bool) -> HttpCall {
    let url = format!("{}/chat/completions", trimmed_base_url(&request.base_url));

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system_instruction() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.user_prompt }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": TEMPERATURE,
    });
    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }

    HttpCall {
        log_url: url.clone(),
        url,
        headers: vec![("authorization", format!("Bearer {}", request.api_key))],
        body,
    }
}

pub fn parse_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let parsed = ChatCompletion::deserialize(body)
        .map_err(|_| ProviderError::fatal(KIND, "response_json_shape_unexpected"))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(content_text)
        .unwrap_or_default();

    Ok(ProviderResponse {
        text: require_text(KIND, text)?,
        usage: parsed.usage.map(Usage::into_stats).unwrap_or_default(),
    })
}

#[derive(Debug, Default)]
pub struct OpenAiStream {
    text: String,
    usage: Option<UsageStats>,
}

impl OpenAiStream {
    pub fn on_frame(&mut self, frame: &SseFrame) -> Result<FrameOutcome, ProviderError> {
        if frame.data.trim() == DONE_SENTINEL {
            return Ok(FrameOutcome::done());
        }
        let Some(value) = parse_frame_json(frame) else {
            return Ok(FrameOutcome::default());
        };
        if let Some(error) = error_in_payload(KIND, &value) {
            return Err(error);
        }
        let Ok(chunk) = ChatCompletionChunk::deserialize(&value) else {
            return Ok(FrameOutcome::default());
        };

        let usage = chunk.usage.map(Usage::into_stats);
        if usage.is_some() {
            self.usage = usage;
        }

        let text = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .unwrap_or_default();
        self.text.push_str(&text);

        if text.is_empty() && usage.is_none() {
            return Ok(FrameOutcome::default());
        }
        Ok(FrameOutcome::delta(StreamDelta { text, usage }))
    }

    pub fn finish(self) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: require_text(KIND, self.text)?,
            usage: self.usage.unwrap_or_default(),
        })
    }
}

/// Some compatible vendors return content as an array of typed parts.
fn content_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl Usage {
    fn into_stats(self) -> UsageStats {
        UsageStats::from_counts(self.prompt_tokens, self.completion_tokens, self.total_tokens)
    }
}
