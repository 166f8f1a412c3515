//! Monitoring lifecycle: scheduler coordination and check recording
//!
//! [`CheckRecorder`] is the scheduler's sink: the single place where a
//! settled check becomes a history row, a possible status transition, and
//! the `monitor:*` events. [`MonitorManager`] owns start/stop semantics
//! and manual-check dispatch.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::core::{HISTORY_LIMIT_KEY, Monitor, MonitorStatus, Site, StatusRecord, now_ms};
use crate::events::{
    CheckActivityPayload, CheckCompletedPayload, DatabaseErrorPayload, EngineEvent, EventBus,
    InternalEvent, MonitoringScopePayload, StatusChangedPayload,
};
use crate::scheduler::{CheckContext, CheckReport, CheckSink, JobKey, MonitorScheduler};
use crate::storage::{
    HistoryRepository, MonitorRepository, SettingsRepository, StorageEngine,
};
use crate::utils::{CorrelationId, EngineResult};

use super::MonitoringOps;

// ============================================================================
// Check recorder (scheduler sink)
// ============================================================================

pub struct CheckRecorder {
    engine: Arc<StorageEngine>,
    public_bus: Arc<EventBus<EngineEvent>>,
    default_history_limit: u32,
}

impl CheckRecorder {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        public_bus: Arc<EventBus<EngineEvent>>,
        default_history_limit: u32,
    ) -> Self {
        Self {
            engine,
            public_bus,
            default_history_limit,
        }
    }

    /// Persist one settled check and emit the corresponding events
    ///
    /// Everything lands in a single transaction; events fire strictly
    /// after the commit. A recording failure never propagates back into
    /// the job; it is logged and surfaced as `database:error`.
    fn record(&self, report: &CheckReport) {
        let monitor = &report.monitor;
        let outcome = &report.outcome;
        let default_limit = self.default_history_limit;

        let committed = self.engine.execute_transaction(|conn| {
            let previous = MonitorRepository::get_by_id_internal(conn, &monitor.id)?
                .map_or(MonitorStatus::Pending, |m| m.status);

            let record = StatusRecord {
                monitor_id: monitor.id.clone(),
                timestamp_ms: now_ms(),
                status: outcome.status,
                response_time_ms: outcome.response_time_ms,
                details: Some(outcome.details.clone()),
            };
            HistoryRepository::append_internal(conn, &record)?;

            let limit = SettingsRepository::get_internal(conn, HISTORY_LIMIT_KEY)?
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(default_limit);
            HistoryRepository::prune_internal(conn, &monitor.id, limit)?;

            if previous != outcome.status {
                MonitorRepository::update_status_internal(conn, &monitor.id, outcome.status)?;
            }
            Ok((previous, record))
        });

        match committed {
            Ok((previous, record)) => {
                if previous != outcome.status {
                    let payload = StatusChangedPayload {
                        site_identifier: monitor.site_identifier.clone(),
                        monitor_id: monitor.id.clone(),
                        previous_status: previous,
                        new_status: outcome.status,
                        response_time_ms: outcome.response_time_ms,
                        details: Some(outcome.details.clone()),
                        timestamp_ms: record.timestamp_ms,
                    };
                    self.public_bus
                        .emit(EngineEvent::MonitorStatusChanged(payload.clone()));
                    match outcome.status {
                        MonitorStatus::Up => {
                            self.public_bus.emit(EngineEvent::MonitorUp(payload));
                        }
                        MonitorStatus::Down => {
                            self.public_bus.emit(EngineEvent::MonitorDown(payload));
                        }
                        _ => {}
                    }
                }
                self.public_bus
                    .emit(EngineEvent::MonitorCheckCompleted(CheckCompletedPayload {
                        site_identifier: monitor.site_identifier.clone(),
                        monitor_id: monitor.id.clone(),
                        run_correlation: report.correlation.clone(),
                        status: outcome.status,
                        duration_ms: report.duration_ms,
                        details: Some(outcome.details.clone()),
                    }));
            }
            Err(e) => {
                tracing::error!(
                    "[{}] Failed to record check for {monitor}: {e}",
                    report.correlation
                );
                self.public_bus
                    .emit(EngineEvent::DatabaseError(DatabaseErrorPayload {
                        operation: "check.record".into(),
                        message: e.to_string(),
                    }));
            }
        }
    }

    fn activity(&self, ctx: &CheckContext) -> CheckActivityPayload {
        CheckActivityPayload {
            site_identifier: ctx.key.site_identifier.clone(),
            monitor_id: ctx.key.monitor_id.clone(),
            run_correlation: ctx.correlation.clone(),
            manual: ctx.manual,
        }
    }
}

impl CheckSink for CheckRecorder {
    fn check_started<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let payload = self.activity(ctx);
            if ctx.manual {
                self.public_bus
                    .emit(EngineEvent::MonitorManualCheckStarted(payload));
            } else {
                self.public_bus
                    .emit(EngineEvent::MonitorCheckStarted(payload));
            }
        })
    }

    fn check_timed_out<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.public_bus
                .emit(EngineEvent::MonitorTimeout(self.activity(ctx)));
        })
    }

    fn check_completed<'a>(&'a self, report: CheckReport) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.record(&report);
        })
    }
}

// ============================================================================
// Monitor manager
// ============================================================================

pub struct MonitorManager {
    engine: Arc<StorageEngine>,
    monitors: MonitorRepository,
    scheduler: Arc<MonitorScheduler>,
    bus: Arc<EventBus<InternalEvent>>,
}

impl MonitorManager {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        monitors: MonitorRepository,
        scheduler: Arc<MonitorScheduler>,
        bus: Arc<EventBus<InternalEvent>>,
    ) -> Self {
        Self {
            engine,
            monitors,
            scheduler,
            bus,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus<InternalEvent>> {
        &self.bus
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<MonitorScheduler> {
        &self.scheduler
    }

    /// Enable monitoring for one monitor or a whole site
    ///
    /// Returns `true` iff at least one job was started.
    pub async fn start_monitoring_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> EngineResult<bool> {
        let targets = self.resolve_targets(identifier, monitor_id).await?;
        if targets.is_empty() {
            return Ok(false);
        }

        let mut started = false;
        for mut monitor in targets {
            monitor.monitoring = true;
            if monitor.status == MonitorStatus::Paused {
                monitor.status = MonitorStatus::Pending;
            }
            self.engine.execute_transaction(|conn| {
                MonitorRepository::set_monitoring_internal(conn, &monitor.id, true)?;
                MonitorRepository::update_status_internal(conn, &monitor.id, monitor.status)?;
                Ok(())
            })?;
            self.scheduler.start_job(&monitor)?;
            started = true;
        }

        self.bus.emit(InternalEvent::MonitoringStarted(MonitoringScopePayload {
            site_identifier: identifier.to_string(),
            monitor_id: monitor_id.map(str::to_string),
        }));
        Ok(started)
    }

    /// Disable monitoring; tears the jobs down and marks monitors paused
    pub async fn stop_monitoring_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> EngineResult<bool> {
        let targets = self.resolve_targets(identifier, monitor_id).await?;
        if targets.is_empty() {
            return Ok(false);
        }

        let mut stopped = false;
        for monitor in targets {
            self.scheduler
                .stop_job(&JobKey::new(identifier, &monitor.id));
            self.engine.execute_transaction(|conn| {
                MonitorRepository::set_monitoring_internal(conn, &monitor.id, false)?;
                MonitorRepository::update_status_internal(
                    conn,
                    &monitor.id,
                    MonitorStatus::Paused,
                )?;
                Ok(())
            })?;
            stopped = true;
        }

        self.bus.emit(InternalEvent::MonitoringStopped(MonitoringScopePayload {
            site_identifier: identifier.to_string(),
            monitor_id: monitor_id.map(str::to_string),
        }));
        Ok(stopped)
    }

    /// Submit a manual check; returns the run's correlation ID
    pub fn check_site_now(
        &self,
        identifier: &str,
        monitor_id: &str,
    ) -> EngineResult<CorrelationId> {
        self.scheduler
            .request_manual_check(&JobKey::new(identifier, monitor_id))
    }

    /// Rebuild the whole scheduler from persisted monitor state
    pub async fn rebuild_from_persisted(&self) -> EngineResult<usize> {
        let monitors = self.monitors.all_monitoring().await?;
        self.scheduler.rebuild(&monitors)
    }

    async fn resolve_targets(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> EngineResult<Vec<Monitor>> {
        let site_monitors = self.monitors.get_by_site(identifier).await?;
        Ok(match monitor_id {
            Some(id) => site_monitors.into_iter().filter(|m| m.id == id).collect(),
            None => site_monitors,
        })
    }
}

impl MonitoringOps for MonitorManager {
    fn halt_jobs(&self, site_identifier: &str, monitor_id: Option<&str>) {
        match monitor_id {
            Some(id) => {
                self.scheduler.stop_job(&JobKey::new(site_identifier, id));
            }
            None => {
                self.scheduler.stop_site_jobs(site_identifier);
            }
        }
    }

    fn setup_new_monitors<'a>(
        &'a self,
        site: &'a Site,
        new_ids: &'a [String],
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            for monitor in site.monitors.iter().filter(|m| new_ids.contains(&m.id)) {
                if monitor.monitoring {
                    self.scheduler.start_job(monitor)?;
                }
            }
            Ok(())
        })
    }

    fn sync_site_jobs<'a>(&'a self, site: &'a Site) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            for monitor in &site.monitors {
                let key = JobKey::new(&site.identifier, &monitor.id);
                if monitor.monitoring {
                    // Replacing the job rotates its state and correlation
                    self.scheduler.start_job(monitor)?;
                } else {
                    self.scheduler.stop_job(&key);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckOutcome;
    use crate::core::Site;
    use crate::storage::SiteRepository;

    async fn seeded_engine() -> (tempfile::TempDir, Arc<StorageEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::initialize(&dir.path().join("watch.db")).unwrap();
        SiteRepository::new(Arc::clone(&engine))
            .upsert(&Site {
                identifier: "s".into(),
                name: "S".into(),
                monitoring: true,
                monitors: Vec::new(),
            })
            .await
            .unwrap();
        let mut monitor = Monitor::draft("m1", "s", "http");
        monitor.url = Some("http://127.0.0.1:1/".into());
        monitor.check_interval_ms = 5_000;
        MonitorRepository::new(Arc::clone(&engine))
            .upsert(&monitor)
            .await
            .unwrap();
        (dir, engine)
    }

    fn report(status: MonitorStatus, details: &str) -> CheckReport {
        let mut monitor = Monitor::draft("m1", "s", "http");
        monitor.check_interval_ms = 5_000;
        CheckReport {
            monitor,
            correlation: CorrelationId::new(),
            outcome: CheckOutcome {
                status,
                response_time_ms: 42,
                details: details.into(),
                error: None,
            },
            timed_out: false,
            manual: false,
            duration_ms: 42,
        }
    }

    #[tokio::test]
    async fn test_recorder_appends_history_and_flips_status() {
        let (_dir, engine) = seeded_engine().await;
        let bus = Arc::new(EventBus::<EngineEvent>::new("public"));

        let status_changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&status_changes);
        bus.subscribe("monitor:status-changed", move |envelope| {
            seen.lock().push(envelope.meta.event_name.clone());
            Ok(())
        })
        .unwrap();
        let ups = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ups2 = Arc::clone(&ups);
        bus.subscribe("monitor:up", move |_| {
            ups2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let recorder = CheckRecorder::new(Arc::clone(&engine), bus, 500);
        recorder
            .check_completed(report(MonitorStatus::Up, "200"))
            .await;

        // History row written, status flipped pending -> up
        let history = HistoryRepository::new(Arc::clone(&engine));
        let rows = history.get_recent("m1", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, MonitorStatus::Up);

        let monitor = MonitorRepository::new(engine)
            .get_by_id("m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monitor.status, MonitorStatus::Up);
        assert_eq!(status_changes.lock().len(), 1);
        assert_eq!(ups.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recorder_emits_down_exactly_once() {
        let (_dir, engine) = seeded_engine().await;
        let bus = Arc::new(EventBus::<EngineEvent>::new("public"));
        let downs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let completions = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let downs2 = Arc::clone(&downs);
        let completions2 = Arc::clone(&completions);
        bus.subscribe("monitor:down", move |_| {
            downs2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        bus.subscribe("monitor:check-completed", move |_| {
            completions2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let recorder = CheckRecorder::new(engine, bus, 500);
        for _ in 0..3 {
            recorder
                .check_completed(report(MonitorStatus::Down, "connection refused"))
                .await;
        }

        // Only the first failure is a transition
        assert_eq!(downs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(completions.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recorder_prunes_to_history_limit() {
        let (_dir, engine) = seeded_engine().await;
        SettingsRepository::new(Arc::clone(&engine))
            .set(HISTORY_LIMIT_KEY, "3")
            .await
            .unwrap();

        let bus = Arc::new(EventBus::<EngineEvent>::new("public"));
        let recorder = CheckRecorder::new(Arc::clone(&engine), bus, 500);
        for _ in 0..6 {
            recorder
                .check_completed(report(MonitorStatus::Up, "200"))
                .await;
        }

        let history = HistoryRepository::new(engine);
        assert_eq!(history.get_recent("m1", 100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_timestamps_are_monotonic() {
        let (_dir, engine) = seeded_engine().await;
        let bus = Arc::new(EventBus::<EngineEvent>::new("public"));
        let recorder = CheckRecorder::new(Arc::clone(&engine), bus, 500);
        for status in [MonitorStatus::Up, MonitorStatus::Down, MonitorStatus::Up] {
            recorder.check_completed(report(status, "x")).await;
        }

        let history = HistoryRepository::new(engine);
        let rows = history.get_recent("m1", 100).await.unwrap();
        // Newest first: timestamps must be non-increasing in this order
        for window in rows.windows(2) {
            assert!(window[0].timestamp_ms >= window[1].timestamp_ms);
        }
    }
}
