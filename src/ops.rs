//! Operational hook: retry, structured logging, lifecycle events
//!
//! Wraps any async operation with bounded retry on classified transient
//! errors, exponential backoff, cancellation-aware sleeps, and optional
//! `operation:*` lifecycle emission when an event bus is supplied.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::events::{EngineEvent, EventBus, OperationPayload};
use crate::utils::{CorrelationId, EngineError, EngineResult};

/// Retry policy for one hooked operation
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `base × 2^(attempt-1)`, capped
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Run `op` under the operational hook
///
/// Transient errors retry up to `policy.max_attempts` with exponential
/// backoff; validation/not-found/duplicate classes fail fast. A firing
/// cancellation token aborts between attempts and during backoff sleeps.
pub async fn run_hooked<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    emitter: Option<&EventBus<EngineEvent>>,
    cancel: Option<&CancellationToken>,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let correlation = CorrelationId::new();
    let started = Instant::now();

    if let Some(bus) = emitter {
        bus.emit(EngineEvent::OperationStarted(OperationPayload {
            operation: operation.to_string(),
            correlation: correlation.clone(),
            attempt: 1,
            duration_ms: None,
            error: None,
        }));
    }

    let mut attempt: u32 = 1;
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!("[{correlation}] {operation}: cancelled before attempt {attempt}");
            return Err(EngineError::Cancelled);
        }

        tracing::trace!("[{correlation}] {operation}: attempt {attempt}");
        match op().await {
            Ok(value) => {
                let elapsed = started.elapsed();
                tracing::debug!(
                    "[{correlation}] {operation}: ok after {attempt} attempt(s) in {elapsed:?}"
                );
                if let Some(bus) = emitter {
                    bus.emit(EngineEvent::OperationCompleted(OperationPayload {
                        operation: operation.to_string(),
                        correlation: correlation.clone(),
                        attempt,
                        duration_ms: Some(elapsed.as_millis() as u64),
                        error: None,
                    }));
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    "[{correlation}] {operation}: attempt {attempt} failed ({e}), retrying in {delay:?}"
                );
                attempt += 1;

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            biased;
                            () = token.cancelled() => {
                                tracing::debug!(
                                    "[{correlation}] {operation}: cancelled during backoff"
                                );
                                return Err(EngineError::Cancelled);
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
            Err(e) => {
                let elapsed = started.elapsed();
                tracing::error!(
                    "[{correlation}] {operation}: failed after {attempt} attempt(s) in {elapsed:?}: {e}"
                );
                if let Some(bus) = emitter {
                    bus.emit(EngineEvent::OperationFailed(OperationPayload {
                        operation: operation.to_string(),
                        correlation: correlation.clone(),
                        attempt,
                        duration_ms: Some(elapsed.as_millis() as u64),
                        error: Some(e.to_string()),
                    }));
                }
                return Err(e);
            }
        }
    }
}
