use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::time::Instant;

use super::classify::provider_error;
use super::gateway::{
    DeltaSink, GenerationRequest, ProviderError, ProviderFuture, ProviderKind, ProviderResponse,
    ProviderTransport, StreamDelta, UsageStats,
};

pub(crate) enum Scripted {
    Respond(ProviderResponse),
    Fail(ProviderError),
    Stream(Vec<&'static str>, UsageStats),
    StreamThenFail(Vec<&'static str>, ProviderError),
}

/// Transport stub that replays a fixed script and records every request.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerationRequest>>,
    started: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn call_instants(&self) -> Vec<Instant> {
        self.started.lock().expect("started lock").clone()
    }

    fn next(&self, request: &GenerationRequest) -> Scripted {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.started.lock().expect("started lock").push(Instant::now());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Scripted::Fail(ProviderError::fatal(
                    request.provider_kind,
                    "scripted transport exhausted",
                ))
            })
    }
}

impl ProviderTransport for ScriptedTransport {
    fn call_once<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            match self.next(request) {
                Scripted::Respond(response) => Ok(response),
                Scripted::Fail(error) | Scripted::StreamThenFail(_, error) => Err(error),
                Scripted::Stream(deltas, usage) => Ok(ProviderResponse {
                    text: deltas.concat(),
                    usage,
                }),
            }
        })
    }

    fn call_once_streaming<'a>(
        &'a self,
        request: &'a GenerationRequest,
        sink: &'a mut DeltaSink,
    ) -> ProviderFuture<'a> {
        Box::pin(async move {
            match self.next(request) {
                Scripted::Respond(response) => {
                    sink.push(StreamDelta::text(response.text.clone()));
                    Ok(response)
                }
                Scripted::Fail(error) => Err(error),
                Scripted::Stream(deltas, usage) => {
                    for delta in &deltas {
                        sink.push(StreamDelta::text(*delta));
                    }
                    Ok(ProviderResponse {
                        text: deltas.concat(),
                        usage,
                    })
                }
                Scripted::StreamThenFail(deltas, error) => {
                    for delta in deltas {
                        sink.push(StreamDelta::text(delta));
                    }
                    Err(error)
                }
            }
        })
    }
}

pub(crate) fn ok(text: &str) -> Scripted {
    ok_with_usage(text, UsageStats::from_counts(Some(10), Some(20), None))
}

pub(crate) fn ok_with_usage(text: &str, usage: UsageStats) -> Scripted {
    Scripted::Respond(ProviderResponse {
        text: text.to_string(),
        usage,
    })
}

pub(crate) fn status_error(kind: ProviderKind, status: u16) -> ProviderError {
    provider_error(kind, Some(status), None, format!("status={status}"))
}

pub(crate) fn sample_request() -> GenerationRequest {
    GenerationRequest {
        provider_kind: ProviderKind::OpenAiCompatible,
        base_url: "http://127.0.0.1:9/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
        api_key: "sk-test".to_string(),
        system_instruction: Some("Du erstellst Prompts für Lehrkräfte.".to_string()),
        user_prompt: "Erstelle einen Tutor-Prompt für Bruchrechnung.".to_string(),
        timeout_ms: 30_000,
    }
}
