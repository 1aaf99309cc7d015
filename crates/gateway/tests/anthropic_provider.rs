mod support;

use axum::http::StatusCode;
use handoff_gateway::llm::{GatewayError, ProviderErrorKind, ProviderKind};
use serde_json::json;
use tokio::sync::mpsc;

use support::{
    MockProviderState, MockReply, http_pipeline, request_for, spawn_mock_provider, sse_event,
};

const HANDOFF: &str = "Du bist ein Tutor für Geometrie und erklärst Flächeninhalte in Klasse 5.";

#[tokio::test]
async fn blocking_call_uses_messages_endpoint_and_headers() {
    let state = MockProviderState::with_replies(vec![MockReply::json(json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": json!({ "handoff_prompt": HANDOFF }).to_string() }],
        "usage": { "input_tokens": 80, "output_tokens": 40 }
    }))]);
    let provider = spawn_mock_provider(state.clone()).await;
    let request = request_for(ProviderKind::Anthropic, &provider.base_url);

    let output = http_pipeline()
        .call_provider_detailed(&request)
        .await
        .expect("generation should succeed");
    let seen = state.seen().await;
    provider.shutdown().await;

    assert_eq!(output.text, HANDOFF);
    assert_eq!(output.usage.prompt_tokens, 80);
    assert_eq!(output.usage.completion_tokens, 40);
    assert_eq!(output.usage.total_tokens, 120);

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/v1/messages");
    assert_eq!(seen[0].header("x-api-key"), Some("test-provider-key"));
    assert_eq!(seen[0].header("anthropic-version"), Some("2023-06-01"));
    assert_eq!(seen[0].body["system"], "Du erstellst Prompts für Lehrkräfte.");
    assert_eq!(seen[0].body["max_tokens"], json!(4096));
    assert_eq!(seen[0].body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn streaming_events_keep_last_seen_usage() {
    let frames = vec![
        sse_event(
            "message_start",
            &json!({ "type": "message_start", "message": { "usage": { "input_tokens": 30, "output_tokens": 1 } } }),
        ),
        sse_event("ping", &json!({ "type": "ping" })),
        sse_event(
            "content_block_delta",
            &json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Du bist ein Tutor für Geometrie " } }),
        ),
        sse_event(
            "content_block_delta",
            &json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "und erklärst Flächeninhalte in Klasse 5." } }),
        ),
        sse_event(
            "message_delta",
            &json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" }, "usage": { "output_tokens": 18 } }),
        ),
        sse_event("message_stop", &json!({ "type": "message_stop" })),
    ];
    let state = MockProviderState::with_replies(vec![MockReply::sse(&frames)]);
    let provider = spawn_mock_provider(state.clone()).await;
    let request = request_for(ProviderKind::Anthropic, &format!("{}/v1", provider.base_url));
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let output = http_pipeline()
        .call_provider_detailed_stream(&request, sender)
        .await
        .expect("streaming generation should succeed");
    let seen = state.seen().await;
    provider.shutdown().await;

    let mut text = String::new();
    while let Ok(delta) = receiver.try_recv() {
        text.push_str(&delta.text);
    }
    assert_eq!(text, HANDOFF);
    assert_eq!(output.text, HANDOFF);
    assert_eq!(output.usage.prompt_tokens, 30);
    assert_eq!(output.usage.completion_tokens, 18);
    assert_eq!(output.usage.total_tokens, 48);
    assert_eq!(seen[0].path, "/v1/messages");
    assert_eq!(seen[0].body["stream"], json!(true));
}

#[tokio::test]
async fn overloaded_529_is_retried_then_succeeds() {
    let state = MockProviderState::with_replies(vec![
        MockReply::error(
            StatusCode::from_u16(529).expect("529 should be a valid status"),
            json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } }),
        ),
        MockReply::json(json!({
            "type": "message",
            "content": [{ "type": "text", "text": HANDOFF }],
            "usage": { "input_tokens": 10, "output_tokens": 20 }
        })),
    ]);
    let provider = spawn_mock_provider(state.clone()).await;
    let request = request_for(ProviderKind::Anthropic, &provider.base_url);

    let output = http_pipeline()
        .call_provider_detailed(&request)
        .await
        .expect("second attempt should succeed");
    let seen = state.seen().await;
    provider.shutdown().await;

    assert_eq!(seen.len(), 2);
    assert_eq!(output.report.attempts, 2);
    assert_eq!(output.text, HANDOFF);
}

#[tokio::test]
async fn bad_request_is_fatal() {
    let state = MockProviderState::with_replies(vec![MockReply::error(
        StatusCode::BAD_REQUEST,
        json!({ "type": "error", "error": { "type": "invalid_request_error", "message": "max_tokens: field required" } }),
    )]);
    let provider = spawn_mock_provider(state.clone()).await;
    let request = request_for(ProviderKind::Anthropic, &provider.base_url);

    let error = http_pipeline()
        .call_provider(&request)
        .await
        .expect_err("400 should fail");
    let seen = state.seen().await;
    provider.shutdown().await;

    assert_eq!(seen.len(), 1);
    assert_eq!(error.http_status(), 502);
    match error {
        GatewayError::Provider(provider_error) => {
            assert_eq!(provider_error.kind, ProviderErrorKind::ProviderFatal);
            assert_eq!(provider_error.provider, Some(ProviderKind::Anthropic));
            assert_eq!(provider_error.message, "max_tokens: field required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
