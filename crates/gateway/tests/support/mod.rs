#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use handoff_gateway::llm::{
    GenerationPipeline, GenerationRequest, HttpProviderTransport, ProviderKind, RetryPolicy,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone)]
pub enum MockBody {
    Json(Value),
    Sse(Vec<String>),
    /// Sends the frames, then drops the connection mid-body.
    SseThenAbort(Vec<String>),
    /// Holds the reply back so the client deadline fires first.
    DelayedJson(Duration, Value),
    /// Sends the frames, then goes silent before ending the body.
    SseThenStall(Vec<String>, Duration),
}

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: MockBody,
}

impl MockReply {
    pub fn json(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: MockBody::Json(body),
        }
    }

    pub fn error(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: MockBody::Json(body),
        }
    }

    pub fn sse(frames: &[String]) -> Self {
        Self {
            status: StatusCode::OK,
            body: MockBody::Sse(frames.to_vec()),
        }
    }

    pub fn sse_then_abort(frames: &[String]) -> Self {
        Self {
            status: StatusCode::OK,
            body: MockBody::SseThenAbort(frames.to_vec()),
        }
    }
}

impl MockReply {
    pub fn delayed_json(delay: Duration, body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: MockBody::DelayedJson(delay, body),
        }
    }

    pub fn sse_then_stall(frames: &[String], stall: Duration) -> Self {
        Self {
            status: StatusCode::OK,
            body: MockBody::SseThenStall(frames.to_vec(), stall),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Value,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct MockProviderState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockProviderState {
    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().await.clone()
    }
}

pub struct MockProvider {
    pub base_url: String,
    shutdown_tx: oneshot::Sender<()>,
    server_task: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn shutdown(self) {
        self.shutdown_tx
            .send(())
            .expect("shutdown signal should send");
        self.server_task.await.expect("server task should join");
    }
}

/// Serves every path so one server can stand in for all three vendors.
pub async fn spawn_mock_provider(state: MockProviderState) -> MockProvider {
    let app = Router::new()
        .fallback(mock_provider_handler)
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let local_addr = listener
        .local_addr()
        .expect("listener address should resolve");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        server.await.expect("test server should run");
    });

    MockProvider {
        base_url: format!("http://{local_addr}"),
        shutdown_tx,
        server_task,
    }
}

async fn mock_provider_handler(
    State(state): State<MockProviderState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.seen.lock().await.push(SeenRequest {
        path: uri.path().to_string(),
        query: uri.query().map(ToString::to_string),
        headers,
        body,
    });

    let reply = state
        .replies
        .lock()
        .await
        .pop_front()
        .unwrap_or_else(|| {
            MockReply::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": { "message": "exhausted_test_replies" } }),
            )
        });

    match reply.body {
        MockBody::Json(value) => (reply.status, Json(value)).into_response(),
        MockBody::Sse(frames) => (
            reply.status,
            [(CONTENT_TYPE, "text/event-stream")],
            frames.concat(),
        )
            .into_response(),
        MockBody::SseThenAbort(frames) => {
            let chunks = stream::iter(
                frames
                    .into_iter()
                    .map(|frame| Ok::<_, io::Error>(Bytes::from(frame))),
            )
            .chain(stream::once(async {
                // Let the frames reach the client before the connection drops.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "mock provider dropped the stream",
                ))
            }));

            (
                reply.status,
                [(CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
                .into_response()
        }
        MockBody::DelayedJson(delay, value) => {
            tokio::time::sleep(delay).await;
            (reply.status, Json(value)).into_response()
        }
        MockBody::SseThenStall(frames, stall) => {
            let chunks = stream::iter(
                frames
                    .into_iter()
                    .map(|frame| Ok::<_, io::Error>(Bytes::from(frame))),
            )
            .chain(stream::once(async move {
                tokio::time::sleep(stall).await;
                Ok::<_, io::Error>(Bytes::new())
            }));

            (
                reply.status,
                [(CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
                .into_response()
        }
    }
}

pub fn sse_data(data: &Value) -> String {
    format!("data: {data}\n\n")
}

pub fn sse_event(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn request_for(kind: ProviderKind, base_url: &str) -> GenerationRequest {
    GenerationRequest {
        provider_kind: kind,
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
        api_key: "test-provider-key".to_string(),
        system_instruction: Some("Du erstellst Prompts für Lehrkräfte.".to_string()),
        user_prompt: "Erstelle einen Tutor-Prompt für Bruchrechnung in Klasse 6.".to_string(),
        timeout_ms: 10_000,
    }
}

/// Real HTTP transport with short backoff so retry tests stay fast.
pub fn http_pipeline() -> GenerationPipeline {
    let transport = HttpProviderTransport::new().expect("http transport should build");
    GenerationPipeline::new(
        transport,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        },
    )
}
