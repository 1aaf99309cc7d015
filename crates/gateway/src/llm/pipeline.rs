use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use super::contract::enforce_contract;
use super::gateway::{
    DeltaSink, GatewayError, GenerationRequest, ProviderTransport, StreamDelta, UsageStats,
};
use super::http::HttpProviderTransport;
use super::privacy::{PrivacyOutcome, enforce_privacy};
use super::retry::{RetryOrchestrator, RetryOutcome, RetryPolicy};
use crate::config::{ConfigError, GatewayConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation_id: Uuid,
    pub attempts: u32,
    pub contract_repaired: bool,
    pub privacy: PrivacyOutcome,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Validated handoff prompt after contract and privacy enforcement.
    pub text: String,
    /// Summed over the primary call and any repair or rewrite call.
    pub usage: UsageStats,
    pub report: GenerationReport,
}

/// Request-to-handoff-prompt pipeline: retrying provider call, output
/// contract, privacy safety net. Holds no per-request state, so one instance
/// can serve concurrent calls.
pub struct GenerationPipeline<T = HttpProviderTransport> {
    transport: T,
    retry: RetryOrchestrator,
    deadline: Option<Duration>,
}

impl GenerationPipeline<HttpProviderTransport> {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(HttpProviderTransport::new()?, config.retry_policy())
            .with_deadline(config.pipeline_deadline()))
    }
}

impl<T> GenerationPipeline<T>
where
    T: ProviderTransport,
{
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry: RetryOrchestrator::new(policy),
            deadline: None,
        }
    }

    /// Bounds the whole pipeline, retries and repair calls included.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn call_provider(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        self.call_provider_detailed(request)
            .await
            .map(|output| output.text)
    }

    pub async fn call_provider_detailed(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GatewayError> {
        self.run(request, None).await
    }

    /// Raw model text is forwarded to `deltas` as it arrives; the returned
    /// text is the enforced handoff prompt. A dropped receiver does not stop
    /// the generation.
    pub async fn call_provider_detailed_stream(
        &self,
        request: &GenerationRequest,
        deltas: mpsc::UnboundedSender<StreamDelta>,
    ) -> Result<GenerationOutput, GatewayError> {
        let mut sink = DeltaSink::new(deltas);
        self.run(request, Some(&mut sink)).await
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        sink: Option<&mut DeltaSink>,
    ) -> Result<GenerationOutput, GatewayError> {
        let generation_id = Uuid::new_v4();
        let span = info_span!(
            "generation",
            %generation_id,
            provider = %request.provider_kind,
            model = %request.model,
            streaming = sink.is_some(),
        );
        let pipeline = self.execute(generation_id, request, sink);

        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, pipeline)
                .instrument(span)
                .await
                .map_err(|_| GatewayError::DeadlineExceeded {
                    deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => pipeline.instrument(span).await,
        }
    }

    async fn execute(
        &self,
        generation_id: Uuid,
        request: &GenerationRequest,
        sink: Option<&mut DeltaSink>,
    ) -> Result<GenerationOutput, GatewayError> {
        let started_at = Instant::now();

        let RetryOutcome { response, attempts } = match sink {
            Some(sink) => {
                self.retry
                    .call_streaming(&self.transport, request, sink)
                    .await?
            }
            None => self.retry.call(&self.transport, request).await?,
        };
        let mut usage = response.usage;

        let contract = enforce_contract(&self.transport, request, &response.text).await?;
        usage.accumulate(contract.repair_usage);

        let privacy = enforce_privacy(&self.transport, request, contract.prompt).await;
        usage.accumulate(privacy.rewrite_usage);

        let report = GenerationReport {
            generation_id,
            attempts,
            contract_repaired: contract.repaired,
            privacy: privacy.outcome,
            latency_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            attempts,
            contract_repaired = report.contract_repaired,
            privacy = report.privacy.as_str(),
            total_tokens = usage.total_tokens,
            latency_ms = report.latency_ms,
            "generation completed"
        );

        Ok(GenerationOutput {
            text: privacy.prompt.into_string(),
            usage,
            report,
        })
    }
}
