//! One monitor's recurring job
//!
//! The job task owns its timer and serializes everything: a scheduled fire
//! and a manual check can never run the same monitor concurrently because
//! both happen inline in one `select!` loop. Commands arriving while a
//! check is in flight queue in the channel and are drained when the check
//! settles, which is the manual-check coalescing rule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use super::delay::{compute_delay, max_backoff_attempt};
use super::models::{JobCommand, JobKey, JobState};
use super::{CheckContext, CheckReport, CheckSink};
use crate::checks::{self, CheckOutcome, Checker};
use crate::config::SchedulerTuning;
use crate::core::Monitor;
use crate::utils::CorrelationId;

pub(crate) struct MonitorJob {
    pub key: JobKey,
    pub monitor: Monitor,
    pub checker: Arc<dyn Checker>,
    pub sink: Arc<dyn CheckSink>,
    pub tuning: SchedulerTuning,
    pub state: Arc<Mutex<JobState>>,
    pub cancel: CancellationToken,
}

impl MonitorJob {
    pub async fn run(self, mut cmd_rx: mpsc::Receiver<JobCommand>) {
        tracing::info!(
            "Job {} started (interval {}ms, timeout {}ms)",
            self.key,
            self.monitor.check_interval_ms,
            self.monitor.timeout_ms
        );

        let mut deadline = self.arm();
        loop {
            let paused = self.state.lock().paused;
            if paused {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd, &mut cmd_rx, &mut deadline).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd, &mut cmd_rx, &mut deadline).await {
                            break;
                        }
                    }
                    None => break,
                },
                () = sleep_until(deadline) => {
                    self.run_cycle(None).await;
                    deadline = self.arm();
                }
            }
        }

        tracing::info!("Job {} stopped", self.key);
    }

    /// Compute the next deadline from the current backoff attempt
    fn arm(&self) -> tokio::time::Instant {
        let (base, attempt) = {
            let state = self.state.lock();
            (state.base_interval_ms, state.backoff_attempt)
        };
        let delay = compute_delay(base, attempt, &self.tuning);
        tracing::debug!("Job {}: next run in {delay}ms (backoff attempt {attempt})", self.key);
        tokio::time::Instant::now() + Duration::from_millis(delay)
    }

    /// Returns `true` when the job must stop
    async fn handle_command(
        &self,
        cmd: JobCommand,
        cmd_rx: &mut mpsc::Receiver<JobCommand>,
        deadline: &mut tokio::time::Instant,
    ) -> bool {
        tracing::debug!("Job {}: handling {cmd}", self.key);
        match cmd {
            JobCommand::Stop => return true,
            JobCommand::Pause => {
                self.state.lock().paused = true;
            }
            JobCommand::Resume => {
                let was_paused = {
                    let mut state = self.state.lock();
                    let was = state.paused;
                    state.paused = false;
                    was
                };
                if was_paused {
                    // Unpausing schedules the next run immediately
                    *deadline = tokio::time::Instant::now();
                }
            }
            JobCommand::ManualCheck(correlation) => {
                let mut correlation = correlation;
                // Coalesce queued manuals: the newest correlation wins
                loop {
                    match cmd_rx.try_recv() {
                        Ok(JobCommand::ManualCheck(newer)) => {
                            tracing::debug!(
                                "Job {}: replacing pending manual {correlation} with {newer}",
                                self.key
                            );
                            self.state.lock().pending_manual_check = Some(newer.clone());
                            correlation = newer;
                        }
                        Ok(JobCommand::Stop) => return true,
                        Ok(JobCommand::Pause) => self.state.lock().paused = true,
                        Ok(JobCommand::Resume) => self.state.lock().paused = false,
                        Err(_) => break,
                    }
                }
                {
                    let mut state = self.state.lock();
                    state.pending_manual_check = None;
                    // Manual pre-emption runs from a clean slate
                    state.backoff_attempt = 0;
                }
                self.run_cycle(Some(correlation)).await;
                *deadline = self.arm();
            }
        }
        false
    }

    /// One check cycle: guard, notify, race against the deadline, record
    async fn run_cycle(&self, manual: Option<CorrelationId>) {
        let is_manual = manual.is_some();
        let correlation = manual.unwrap_or_else(CorrelationId::new);

        {
            let mut state = self.state.lock();
            if state.is_running {
                state.needs_reschedule = true;
                tracing::warn!("Job {}: fire while running, coalesced", self.key);
                return;
            }
            state.is_running = true;
            state.correlation_id = correlation.clone();
        }

        let ctx = CheckContext {
            key: self.key.clone(),
            correlation: correlation.clone(),
            manual: is_manual,
        };
        self.sink.check_started(&ctx).await;

        let started = Instant::now();
        let overall = Duration::from_millis(
            self.monitor
                .timeout_ms
                .saturating_add(self.tuning.timeout_buffer_ms),
        );
        let check_cancel = self.cancel.child_token();

        let outcome = tokio::select! {
            outcome = checks::execute_with_retries(
                self.checker.as_ref(),
                &self.monitor,
                &check_cancel,
            ) => outcome,
            () = tokio::time::sleep(overall) => {
                // Deadline hit: abort the checker and record a timeout
                check_cancel.cancel();
                CheckOutcome::timeout(overall.as_millis() as u64)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let timed_out = !outcome.is_up() && outcome.details == checks::TIMEOUT_DETAILS;
        if timed_out {
            self.sink.check_timed_out(&ctx).await;
        }

        self.sink
            .check_completed(CheckReport {
                monitor: self.monitor.clone(),
                correlation,
                outcome: outcome.clone(),
                timed_out,
                manual: is_manual,
                duration_ms,
            })
            .await;

        {
            let mut state = self.state.lock();
            if outcome.is_up() {
                state.backoff_attempt = 0;
            } else if !is_manual {
                let bound = max_backoff_attempt(state.base_interval_ms, &self.tuning);
                if state.backoff_attempt < bound {
                    state.backoff_attempt += 1;
                }
            }
            state.is_running = false;
            state.needs_reschedule = false;
        }
    }
}
