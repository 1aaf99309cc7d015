//! Vendor wire formats. Adapters are pure: they build the outbound call and
//! decode bodies and stream frames, leaving I/O to the transport.

pub mod anthropic;
pub mod google;
pub mod openai;

use serde_json::Value;

use super::gateway::{GenerationRequest, ProviderError, ProviderKind, ProviderResponse, StreamDelta};
use super::sse::SseFrame;

pub struct HttpCall {
    pub url: String,
    /// Same as `url` with credentials removed, safe to log.
    pub log_url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub delta: Option<StreamDelta>,
    pub done: bool,
}

impl FrameOutcome {
    fn delta(delta: StreamDelta) -> Self {
        Self {
            delta: Some(delta),
            done: false,
        }
    }

    fn done() -> Self {
        Self {
            delta: None,
            done: true,
        }
    }
}

pub fn build_call(request: &GenerationRequest, stream: bool) -> Result<HttpCall, ProviderError> {
    match request.provider_kind {
        ProviderKind::OpenAiCompatible => Ok(openai::build_call(request, stream)),
        ProviderKind::Anthropic => Ok(anthropic::build_call(request, stream)),
        ProviderKind::Google => google::build_call(request, stream),
    }
}

pub fn parse_response(kind: ProviderKind, body: &Value) -> Result<ProviderResponse, ProviderError> {
    match kind {
        ProviderKind::OpenAiCompatible => openai::parse_response(body),
        ProviderKind::Anthropic => anthropic::parse_response(body),
        ProviderKind::Google => google::parse_response(body),
    }
}

/// Per-response streaming state for one provider.
#[derive(Debug)]
pub enum StreamDecoder {
    OpenAi(openai::OpenAiStream),
    Anthropic(anthropic::AnthropicStream),
    Google(google::GoogleStream),
}

impl StreamDecoder {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAiCompatible => Self::OpenAi(openai::OpenAiStream::default()),
            ProviderKind::Anthropic => Self::Anthropic(anthropic::AnthropicStream::default()),
            ProviderKind::Google => Self::Google(google::GoogleStream::default()),
        }
    }

    pub fn on_frame(&mut self, frame: &SseFrame) -> Result<FrameOutcome, ProviderError> {
        match self {
            Self::OpenAi(state) => state.on_frame(frame),
            Self::Anthropic(state) => state.on_frame(frame),
            Self::Google(state) => state.on_frame(frame),
        }
    }

    pub fn finish(self) -> Result<ProviderResponse, ProviderError> {
        match self {
            Self::OpenAi(state) => state.finish(),
            Self::Anthropic(state) => state.finish(),
            Self::Google(state) => state.finish(),
        }
    }
}

pub(crate) fn trimmed_base_url(base_url: &str) -> &str {
    base_url.trim().trim_end_matches('/')
}

pub(crate) fn require_text(
    kind: ProviderKind,
    text: String,
) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::fatal(
            kind,
            "provider response contained no extractable text",
        ));
    }
    Ok(text)
}

/// Stream frames that are not JSON (keep-alives, vendor noise) are skipped.
pub(crate) fn parse_frame_json(frame: &SseFrame) -> Option<Value> {
    serde_json::from_str(&frame.data).ok()
}
