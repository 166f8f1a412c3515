//! Check executors
//!
//! Each monitor type provides a [`Checker`] producing a [`CheckOutcome`].
//! Executors honor the caller's cancellation token, clamp their own I/O to
//! the monitor timeout, and never touch storage or event buses; the
//! scheduler's sink does the recording.

pub mod dns;
pub mod http;
pub mod ping;
pub mod port;
pub mod rate_limit;
pub mod ssl;

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{Monitor, MonitorStatus};

pub use dns::DnsChecker;
pub use http::{HttpChecker, HttpMode};
pub use ping::PingChecker;
pub use port::PortChecker;
pub use rate_limit::HostRateLimiter;
pub use ssl::SslChecker;

pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = CheckOutcome> + Send + 'a>>;

/// Detail string used whenever a check is cut short by its deadline
pub const TIMEOUT_DETAILS: &str = "timeout";

/// Result of a single check execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub status: MonitorStatus,
    pub response_time_ms: u64,
    /// Short category: HTTP status code, "connection refused", "timeout"
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckOutcome {
    #[must_use]
    pub fn up(response_time_ms: u64, details: impl Into<String>) -> Self {
        Self {
            status: MonitorStatus::Up,
            response_time_ms,
            details: details.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn down(
        response_time_ms: u64,
        details: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            status: MonitorStatus::Down,
            response_time_ms,
            details: details.into(),
            error,
        }
    }

    #[must_use]
    pub fn timeout(response_time_ms: u64) -> Self {
        Self::down(response_time_ms, TIMEOUT_DETAILS, None)
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status == MonitorStatus::Up
    }
}

/// A monitor type's check implementation
///
/// `check` must settle within the monitor's timeout (plus a small
/// scheduler-side buffer) and return `down`/`"timeout"` when the
/// cancellation token fires first.
pub trait Checker: Send + Sync {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a>;
}

/// Race a checker body against the cancellation token
///
/// Shared by every executor so cancellation semantics stay uniform.
pub(crate) async fn run_cancellable<F>(cancel: &CancellationToken, body: F) -> CheckOutcome
where
    F: Future<Output = CheckOutcome>,
{
    let started = Instant::now();
    tokio::select! {
        biased;
        () = cancel.cancelled() => CheckOutcome::timeout(elapsed_ms(started)),
        outcome = body => outcome,
    }
}

/// Drive a checker with the monitor's internal retry budget
///
/// `retry_attempts` extra attempts run after a failed first try; the first
/// `up` wins. This is distinct from the scheduler's backoff between runs.
pub async fn execute_with_retries(
    checker: &dyn Checker,
    monitor: &Monitor,
    cancel: &CancellationToken,
) -> CheckOutcome {
    let attempts = monitor.retry_attempts.saturating_add(1);
    let mut outcome = checker.check(monitor, cancel).await;
    for attempt in 2..=attempts {
        if outcome.is_up() || cancel.is_cancelled() {
            break;
        }
        tracing::debug!("{monitor}: retrying within check (attempt {attempt}/{attempts})");
        outcome = checker.check(monitor, cancel).await;
    }
    outcome
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
