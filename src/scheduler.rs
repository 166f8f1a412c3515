//! Monitor scheduler
//!
//! One in-memory job per actively-monitored monitor, keyed by
//! `(site_identifier, monitor_id)`. Each job is an independent task driven
//! by a `tokio::select!` loop: a jittered timer arms scheduled runs, a
//! command channel delivers manual checks and pause/resume, and a
//! cancellation token handles shutdown. Results flow through a
//! [`CheckSink`] owned by the monitor manager; the scheduler itself never
//! touches storage.

pub mod delay;
pub mod job;
pub mod models;
pub mod runner;

use futures::future::BoxFuture;

pub use models::{JobCommand, JobKey, JobState};
pub use runner::MonitorScheduler;

use crate::checks::CheckOutcome;
use crate::core::Monitor;
use crate::utils::CorrelationId;

/// Identity of one check run, passed to the sink before execution
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub key: JobKey,
    pub correlation: CorrelationId,
    pub manual: bool,
}

/// Everything the sink needs to record a settled check
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub monitor: Monitor,
    pub correlation: CorrelationId,
    pub outcome: CheckOutcome,
    pub timed_out: bool,
    pub manual: bool,
    pub duration_ms: u64,
}

/// Receives check lifecycle callbacks from jobs
///
/// The monitor manager's implementation persists history, detects status
/// transitions, and emits the `monitor:*` events strictly after the
/// completing check's write.
pub trait CheckSink: Send + Sync {
    fn check_started<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, ()>;

    fn check_timed_out<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, ()>;

    fn check_completed<'a>(&'a self, report: CheckReport) -> BoxFuture<'a, ()>;
}
