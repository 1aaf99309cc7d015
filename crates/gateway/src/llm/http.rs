use std::pin::pin;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::classify::{error_from_response, error_in_payload};
use super::gateway::{
    DeltaSink, GenerationRequest, ProviderError, ProviderFuture, ProviderKind, ProviderTransport,
};
use super::providers::{self, HttpCall, StreamDecoder};
use super::sse::frame_stream;
use crate::config::ConfigError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport that speaks the vendor HTTP APIs. Each call carries its own
/// deadline from the request; the client itself has no overall timeout.
#[derive(Clone)]
pub struct HttpProviderTransport {
    client: reqwest::Client,
}

impl HttpProviderTransport {
    pub fn new() -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        kind: ProviderKind,
        call: &HttpCall,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProviderError> {
        debug!(provider = %kind, url = %call.log_url, "sending provider request");

        let mut builder = self
            .client
            .post(&call.url)
            .timeout(timeout)
            .json(&call.body);
        for (name, value) in &call.headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(kind, timeout, &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(kind, status.as_u16(), &body));
        }

        Ok(response)
    }
}

impl ProviderTransport for HttpProviderTransport {
    fn call_once<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            let kind = request.provider_kind;
            let timeout = request.timeout();
            let call = providers::build_call(request, false)?;
            let response = self.send(kind, &call, timeout).await?;

            let body = response
                .text()
                .await
                .map_err(|err| map_reqwest_error(kind, timeout, &err))?;
            let value = serde_json::from_str::<Value>(&body)
                .map_err(|_| ProviderError::fatal(kind, "response_json_parse_failed"))?;
            if let Some(error) = error_in_payload(kind, &value) {
                return Err(error);
            }

            providers::parse_response(kind, &value)
        })
    }

    fn call_once_streaming<'a>(
        &'a self,
        request: &'a GenerationRequest,
        sink: &'a mut DeltaSink,
    ) -> ProviderFuture<'a> {
        Box::pin(async move {
            let kind = request.provider_kind;
            let timeout = request.timeout();
            let call = providers::build_call(request, true)?;
            let response = self.send(kind, &call, timeout).await?;

            let mut decoder = StreamDecoder::for_provider(kind);
            let mut frames = pin!(frame_stream(Box::pin(response.bytes_stream())));
            while let Some(frame) = frames.next().await {
                let frame = frame.map_err(|err| map_reqwest_error(kind, timeout, &err))?;
                let outcome = decoder.on_frame(&frame)?;
                if let Some(delta) = outcome.delta {
                    sink.push(delta);
                }
                if outcome.done {
                    break;
                }
            }

            decoder.finish()
        })
    }
}

fn map_reqwest_error(kind: ProviderKind, timeout: Duration, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(
            kind,
            format!("request timed out after {}ms", timeout.as_millis()),
        )
    } else {
        // reqwest errors can embed the request url, which carries the Google key.
        let reason = if err.is_connect() {
            "connection_failed"
        } else if err.is_body() || err.is_decode() {
            "response_body_read_failed"
        } else {
            "request_unavailable"
        };
        ProviderError::transport(kind, reason)
    }
}
