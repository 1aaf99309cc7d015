mod support;

use std::time::{Duration, Instant};

use handoff_gateway::llm::gateway::MIN_TIMEOUT_MS;
use handoff_gateway::llm::{
    GatewayError, HttpProviderTransport, ProviderErrorKind, ProviderKind, ProviderTransport,
    StreamDelta,
};
use serde_json::json;
use tokio::sync::mpsc;

use support::{
    MockProviderState, MockReply, http_pipeline, request_for, spawn_mock_provider, sse_data,
};

/// Long enough to outlast the per-call deadline, short enough for graceful shutdown.
fn past_deadline() -> Duration {
    Duration::from_millis(MIN_TIMEOUT_MS + 1_500)
}

#[tokio::test]
async fn slow_blocking_reply_is_a_retryable_timeout() {
    let state = MockProviderState::with_replies(vec![MockReply::delayed_json(
        past_deadline(),
        json!({ "choices": [{ "message": { "content": "zu spät" } }] }),
    )]);
    let provider = spawn_mock_provider(state.clone()).await;
    let mut request = request_for(ProviderKind::OpenAiCompatible, &provider.base_url);
    // Raised to the floor, so the call waits MIN_TIMEOUT_MS.
    request.timeout_ms = 100;
    let transport = HttpProviderTransport::new().expect("http transport should build");

    let started_at = Instant::now();
    let error = transport
        .call_once(&request)
        .await
        .expect_err("slow reply should time out");
    let elapsed = started_at.elapsed();
    let seen = state.seen().await;
    provider.shutdown().await;

    assert_eq!(error.kind, ProviderErrorKind::TransportTimeout);
    assert_eq!(error.http_status, Some(408));
    assert!(error.retryable);
    assert!(!error.overloaded);
    assert_eq!(error.provider, Some(ProviderKind::OpenAiCompatible));
    assert!(elapsed >= Duration::from_millis(MIN_TIMEOUT_MS));
    assert!(elapsed < past_deadline());
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn stream_stalling_after_first_delta_times_out_without_retry() {
    let frames = vec![sse_data(
        &json!({ "choices": [{ "delta": { "content": "Du bist ein Lehrer " } }] }),
    )];
    let state = MockProviderState::with_replies(vec![
        MockReply::sse_then_stall(&frames, past_deadline()),
        MockReply::json(json!({ "choices": [{ "message": { "content": "nie angefragt" } }] })),
    ]);
    let provider = spawn_mock_provider(state.clone()).await;
    let mut request = request_for(ProviderKind::OpenAiCompatible, &provider.base_url);
    request.timeout_ms = 100;
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let error = http_pipeline()
        .call_provider_detailed_stream(&request, sender)
        .await
        .expect_err("stalled stream should time out");
    let seen = state.seen().await;
    provider.shutdown().await;

    assert_eq!(seen.len(), 1);
    assert_eq!(
        receiver.try_recv().expect("first delta should arrive"),
        StreamDelta::text("Du bist ein Lehrer ")
    );
    assert!(receiver.try_recv().is_err());
    assert_eq!(error.http_status(), 504);
    match error {
        GatewayError::Provider(provider_error) => {
            assert_eq!(provider_error.kind, ProviderErrorKind::TransportTimeout);
            assert_eq!(provider_error.http_status, Some(408));
            assert!(provider_error.retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
