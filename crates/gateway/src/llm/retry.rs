use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::gateway::{
    DeltaSink, GenerationRequest, ProviderError, ProviderResponse, ProviderTransport,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given (1-based) failed attempt: `base * 2^(attempt - 1)`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    /// No further attempt: the budget is spent or the error is not retryable.
    Exhausted { attempts: u32 },
    Succeeded { attempts: u32 },
    /// Streaming only: text already reached the caller, so a retry would duplicate it.
    AbortedAfterPartialStream { attempts: u32 },
}

impl RetryState {
    /// State that follows a failed attempt.
    pub fn after_failure(
        policy: &RetryPolicy,
        attempt: u32,
        error: &ProviderError,
        delivered_deltas: usize,
    ) -> Self {
        if delivered_deltas > 0 {
            return Self::AbortedAfterPartialStream { attempts: attempt };
        }
        if !error.retryable || attempt >= policy.max_attempts {
            return Self::Exhausted { attempts: attempt };
        }

        Self::BackingOff {
            attempt,
            delay: policy.backoff_after(attempt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub response: ProviderResponse,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn call<T>(
        &self,
        transport: &T,
        request: &GenerationRequest,
    ) -> Result<RetryOutcome, ProviderError>
    where
        T: ProviderTransport + ?Sized,
    {
        let mut attempt = 1_u32;

        loop {
            debug!(state = ?RetryState::Attempting { attempt }, "calling provider");
            let error = match transport.call_once(request).await {
                Ok(response) => return Ok(self.succeeded(response, attempt)),
                Err(error) => error,
            };

            match RetryState::after_failure(&self.policy, attempt, &error, 0) {
                RetryState::BackingOff { delay, .. } => {
                    self.log_backoff(request, attempt, delay, &error);
                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                terminal => return Err(self.terminal(request, terminal, error)),
            }
        }
    }

    /// Like [`RetryOrchestrator::call`], except that any failure after the first
    /// text delta reached `sink` ends the call.
    pub async fn call_streaming<T>(
        &self,
        transport: &T,
        request: &GenerationRequest,
        sink: &mut DeltaSink,
    ) -> Result<RetryOutcome, ProviderError>
    where
        T: ProviderTransport + ?Sized,
    {
        let mut attempt = 1_u32;

        loop {
            debug!(state = ?RetryState::Attempting { attempt }, "calling provider (streaming)");
            let error = match transport.call_once_streaming(request, sink).await {
                Ok(response) => return Ok(self.succeeded(response, attempt)),
                Err(error) => error,
            };

            match RetryState::after_failure(&self.policy, attempt, &error, sink.delivered()) {
                RetryState::BackingOff { delay, .. } => {
                    self.log_backoff(request, attempt, delay, &error);
                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                terminal => return Err(self.terminal(request, terminal, error)),
            }
        }
    }

    fn succeeded(&self, response: ProviderResponse, attempts: u32) -> RetryOutcome {
        debug!(state = ?RetryState::Succeeded { attempts }, "provider call succeeded");
        RetryOutcome { response, attempts }
    }

    fn log_backoff(
        &self,
        request: &GenerationRequest,
        attempt: u32,
        delay: Duration,
        error: &ProviderError,
    ) {
        warn!(
            provider = %request.provider_kind,
            model = %request.model,
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            status = ?error.http_status,
            overloaded = error.overloaded,
            "retryable provider failure; backing off: {}",
            error.message
        );
    }

    fn terminal(
        &self,
        request: &GenerationRequest,
        state: RetryState,
        error: ProviderError,
    ) -> ProviderError {
        info!(
            provider = %request.provider_kind,
            model = %request.model,
            state = ?state,
            kind = %error.kind,
            status = ?error.http_status,
            "provider call failed: {}",
            error.message
        );
        error
    }
}
