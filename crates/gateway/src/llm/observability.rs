use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::gateway::{GatewayError, GenerationRequest, ProviderTransport};
use super::pipeline::{GenerationOutput, GenerationPipeline};

/// Flat audit record for one generation call. The caller persists it; the
/// gateway only reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationTelemetryEvent {
    pub generation_id: Option<Uuid>,
    pub provider: &'static str,
    pub model: String,
    pub outcome: &'static str,
    pub latency_ms: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub attempts: Option<u32>,
    pub contract_repaired: Option<bool>,
    pub privacy: Option<&'static str>,
    pub error_type: Option<&'static str>,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
}

pub async fn generate_with_telemetry<T>(
    pipeline: &GenerationPipeline<T>,
    request: &GenerationRequest,
) -> (Result<GenerationOutput, GatewayError>, GenerationTelemetryEvent)
where
    T: ProviderTransport,
{
    let started_at = Instant::now();
    let result = pipeline.call_provider_detailed(request).await;
    let telemetry = telemetry_for_result(request, started_at.elapsed(), &result);
    log_telemetry(&telemetry);
    (result, telemetry)
}

pub fn telemetry_for_result(
    request: &GenerationRequest,
    latency: Duration,
    result: &Result<GenerationOutput, GatewayError>,
) -> GenerationTelemetryEvent {
    let latency_ms = duration_to_millis(latency);
    let provider = request.provider_kind.as_str();
    let model = request.model.clone();

    match result {
        Ok(output) => GenerationTelemetryEvent {
            generation_id: Some(output.report.generation_id),
            provider,
            model,
            outcome: "success",
            latency_ms,
            prompt_tokens: Some(output.usage.prompt_tokens),
            completion_tokens: Some(output.usage.completion_tokens),
            total_tokens: Some(output.usage.total_tokens),
            attempts: Some(output.report.attempts),
            contract_repaired: Some(output.report.contract_repaired),
            privacy: Some(output.report.privacy.as_str()),
            error_type: None,
            http_status: None,
            error_message: None,
        },
        Err(err) => GenerationTelemetryEvent {
            generation_id: None,
            provider,
            model,
            outcome: if err.is_overloaded() {
                "overloaded"
            } else {
                "failure"
            },
            latency_ms,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            attempts: None,
            contract_repaired: None,
            privacy: None,
            error_type: Some(err.error_type()),
            http_status: Some(err.http_status()),
            // Original provider detail is kept for the audit log, never for end users.
            error_message: Some(err.to_string()),
        },
    }
}

fn log_telemetry(event: &GenerationTelemetryEvent) {
    if event.error_type.is_some() {
        warn!(
            provider = event.provider,
            model = %event.model,
            outcome = event.outcome,
            error_type = event.error_type,
            http_status = event.http_status,
            latency_ms = event.latency_ms,
            "generation failed"
        );
    } else {
        info!(
            provider = event.provider,
            model = %event.model,
            outcome = event.outcome,
            total_tokens = event.total_tokens,
            attempts = event.attempts,
            latency_ms = event.latency_ms,
            "generation succeeded"
        );
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
