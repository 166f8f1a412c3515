//! The scheduler's job table
//!
//! Owns one [`MonitorJob`](super::job::MonitorJob) task per actively
//! monitored monitor. No job state is persisted: on startup the table is
//! rebuilt from the monitors' `monitoring` column with independently
//! jittered initial delays, and all backoff resets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::job::MonitorJob;
use super::models::{JobCommand, JobKey, JobState};
use super::CheckSink;
use crate::config::SchedulerTuning;
use crate::core::Monitor;
use crate::registry::MonitorTypeRegistry;
use crate::utils::{CorrelationId, EngineError, EngineResult};

const JOB_COMMAND_BUFFER: usize = 16;

struct JobHandle {
    cmd_tx: mpsc::Sender<JobCommand>,
    state: Arc<Mutex<JobState>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct MonitorScheduler {
    tuning: SchedulerTuning,
    registry: Arc<MonitorTypeRegistry>,
    sink: Arc<dyn CheckSink>,
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
    shutdown: CancellationToken,
}

impl MonitorScheduler {
    #[must_use]
    pub fn new(
        tuning: SchedulerTuning,
        registry: Arc<MonitorTypeRegistry>,
        sink: Arc<dyn CheckSink>,
    ) -> Self {
        Self {
            tuning,
            registry,
            sink,
            jobs: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start (or replace) the job for a monitor
    ///
    /// An existing job for the same key is stopped first; the replacement
    /// gets fresh state and a fresh correlation ID.
    pub fn start_job(&self, monitor: &Monitor) -> EngineResult<()> {
        let key = JobKey::new(&monitor.site_identifier, &monitor.id);
        let checker = self
            .registry
            .make_checker(&monitor.monitor_type)
            .ok_or_else(|| {
                EngineError::validation(
                    format!("unknown monitor type '{}'", monitor.monitor_type),
                    vec![],
                )
            })?;

        self.stop_job(&key);

        let state = Arc::new(Mutex::new(JobState::new(
            monitor.check_interval_ms,
            monitor.timeout_ms,
        )));
        let cancel = self.shutdown.child_token();
        let (cmd_tx, cmd_rx) = mpsc::channel(JOB_COMMAND_BUFFER);

        let job = MonitorJob {
            key: key.clone(),
            monitor: monitor.clone(),
            checker,
            sink: Arc::clone(&self.sink),
            tuning: self.tuning.clone(),
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(job.run(cmd_rx));

        self.jobs.lock().insert(
            key,
            JobHandle {
                cmd_tx,
                state,
                cancel,
                task,
            },
        );
        Ok(())
    }

    /// Stop and remove a job; `false` when no job existed
    pub fn stop_job(&self, key: &JobKey) -> bool {
        match self.jobs.lock().remove(key) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every job belonging to a site; returns the stopped keys
    pub fn stop_site_jobs(&self, site_identifier: &str) -> Vec<JobKey> {
        let keys: Vec<JobKey> = self
            .jobs
            .lock()
            .keys()
            .filter(|k| k.site_identifier == site_identifier)
            .cloned()
            .collect();
        for key in &keys {
            self.stop_job(key);
        }
        keys
    }

    /// Queue a manual check, pre-empting the schedule
    pub fn request_manual_check(&self, key: &JobKey) -> EngineResult<CorrelationId> {
        let jobs = self.jobs.lock();
        let handle = jobs
            .get(key)
            .ok_or_else(|| EngineError::not_found("scheduler job", key.to_string()))?;
        let correlation = CorrelationId::new();
        handle
            .cmd_tx
            .try_send(JobCommand::ManualCheck(correlation.clone()))
            .map_err(|e| EngineError::internal(format!("job {key} command queue: {e}")))?;
        Ok(correlation)
    }

    pub fn pause(&self, key: &JobKey) -> bool {
        self.send(key, JobCommand::Pause)
    }

    pub fn resume(&self, key: &JobKey) -> bool {
        self.send(key, JobCommand::Resume)
    }

    pub fn pause_all(&self) {
        for key in self.active_keys() {
            self.pause(&key);
        }
    }

    pub fn resume_all(&self) {
        for key in self.active_keys() {
            self.resume(&key);
        }
    }

    fn send(&self, key: &JobKey, cmd: JobCommand) -> bool {
        let jobs = self.jobs.lock();
        match jobs.get(key) {
            Some(handle) => handle.cmd_tx.try_send(cmd).is_ok(),
            None => false,
        }
    }

    /// Rebuild the whole table from persisted monitor state
    ///
    /// Initial delays are independently jittered per job, so a restart
    /// never lines every monitor up into a thundering herd.
    pub fn rebuild(&self, monitors: &[Monitor]) -> EngineResult<usize> {
        let keys = self.active_keys();
        for key in &keys {
            self.stop_job(key);
        }

        let mut started = 0;
        for monitor in monitors.iter().filter(|m| m.monitoring) {
            self.start_job(monitor)?;
            started += 1;
        }
        tracing::info!("Scheduler rebuilt with {started} job(s)");
        Ok(started)
    }

    #[must_use]
    pub fn is_scheduled(&self, key: &JobKey) -> bool {
        self.jobs.lock().contains_key(key)
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    #[must_use]
    pub fn active_keys(&self) -> Vec<JobKey> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Snapshot of a job's state for diagnostics and tests
    #[must_use]
    pub fn job_state(&self, key: &JobKey) -> Option<JobState> {
        self.jobs.lock().get(key).map(|h| h.state.lock().clone())
    }

    /// Cancel all jobs and await in-flight checks within `grace`
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self
            .jobs
            .lock()
            .drain()
            .map(|(_, handle)| handle.task)
            .collect();
        if tasks.is_empty() {
            return;
        }
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("Scheduler shutdown grace elapsed with checks still settling");
        } else {
            tracing::info!("Scheduler shut down cleanly");
        }
    }
}

impl std::fmt::Debug for MonitorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorScheduler")
            .field("jobs", &self.job_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod runner_tests;
