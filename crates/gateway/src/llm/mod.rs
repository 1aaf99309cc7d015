pub mod classify;
pub mod contract;
pub mod gateway;
pub mod http;
pub mod observability;
pub mod pipeline;
pub mod privacy;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod sse;

#[cfg(test)]
pub(crate) mod test_support;

pub use contract::{HandoffPrompt, extract_handoff_prompt};
pub use gateway::{
    DeltaSink, GatewayError, GenerationRequest, ProviderError, ProviderErrorKind, ProviderKind,
    ProviderResponse, ProviderTransport, StreamDelta, UsageStats,
};
pub use http::HttpProviderTransport;
pub use observability::{GenerationTelemetryEvent, generate_with_telemetry};
pub use pipeline::{GenerationOutput, GenerationPipeline, GenerationReport};
pub use privacy::PrivacyOutcome;
pub use retry::{RetryOrchestrator, RetryPolicy, RetryState};
pub use sse::{SseFrame, SseFrameReader};
