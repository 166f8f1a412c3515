use std::fmt::Display;

use serde::Serialize;

use crate::utils::CorrelationId;

// ============================================================================
// Job identity
// ============================================================================

/// Scheduler jobs are keyed by `(site_identifier, monitor_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    pub site_identifier: String,
    pub monitor_id: String,
}

impl JobKey {
    #[must_use]
    pub fn new(site_identifier: impl Into<String>, monitor_id: impl Into<String>) -> Self {
        Self {
            site_identifier: site_identifier.into(),
            monitor_id: monitor_id.into(),
        }
    }
}

impl Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.site_identifier, self.monitor_id)
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to a running job from the scheduler
#[derive(Debug, Clone)]
pub enum JobCommand {
    /// Run a check now, pre-empting the schedule
    ManualCheck(CorrelationId),
    /// Stop firing scheduled checks; manual checks still run
    Pause,
    /// Resume scheduled checks, next run armed immediately
    Resume,
    /// Tear the job down
    Stop,
}

impl Display for JobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobCommand::ManualCheck(correlation) => write!(f, "ManualCheck({correlation})"),
            JobCommand::Pause => write!(f, "Pause"),
            JobCommand::Resume => write!(f, "Resume"),
            JobCommand::Stop => write!(f, "Stop"),
        }
    }
}

// ============================================================================
// Job state
// ============================================================================

/// Mutable per-job state, snapshot-able for diagnostics and tests
#[derive(Debug, Clone)]
pub struct JobState {
    pub base_interval_ms: u64,
    pub timeout_ms: u64,
    /// Exponent driving delay growth; reset to 0 on any `up` outcome
    pub backoff_attempt: u32,
    pub is_running: bool,
    /// Set when a fire lands while a check is in flight
    pub needs_reschedule: bool,
    pub paused: bool,
    /// Rotates per scheduled run
    pub correlation_id: CorrelationId,
    /// At most one queued manual run; a newer request replaces it
    pub pending_manual_check: Option<CorrelationId>,
}

impl JobState {
    #[must_use]
    pub fn new(base_interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            base_interval_ms,
            timeout_ms,
            backoff_attempt: 0,
            is_running: false,
            needs_reschedule: false,
            paused: false,
            correlation_id: CorrelationId::new(),
            pending_manual_check: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_display() {
        let key = JobKey::new("example", "m1");
        assert_eq!(key.to_string(), "example/m1");
    }

    #[test]
    fn test_command_display() {
        assert_eq!(JobCommand::Pause.to_string(), "Pause");
        assert_eq!(JobCommand::Stop.to_string(), "Stop");
        let correlation = CorrelationId::new();
        assert_eq!(
            JobCommand::ManualCheck(correlation.clone()).to_string(),
            format!("ManualCheck({correlation})")
        );
    }

    #[test]
    fn test_fresh_job_state() {
        let state = JobState::new(5_000, 3_000);
        assert_eq!(state.backoff_attempt, 0);
        assert!(!state.is_running);
        assert!(!state.needs_reschedule);
        assert!(!state.paused);
        assert!(state.pending_manual_check.is_none());
    }
}
