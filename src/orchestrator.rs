//! Orchestrator: the composition root and event router
//!
//! Builds every component in dependency order, subscribes to each
//! manager's internal bus, and rebroadcasts a fixed set of events on the
//! public bus with fresh metadata. Cross-manager calls flow through the
//! narrow [`MonitoringOps`] seam; no component reaches back after startup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::checks::CheckOutcome;
use crate::config::EngineConfig;
use crate::core::{Monitor, Site};
use crate::events::{
    EngineEvent, EventBus, InternalEvent, LoggingMiddleware, RateLimitMiddleware, Subscription,
    SystemPayload, ValidationMiddleware,
};
use crate::managers::{
    BackupArtifact, BackupMetadata, CheckRecorder, DatabaseManager, ImportPreview,
    MonitorManager, MonitoringOps, PortableSnapshot, SiteManager, SiteUpdate,
};
use crate::registry::{
    MigrationRegistry, MonitorTypeRegistry, MonitorTypeSummary, register_builtin_types,
};
use crate::scheduler::{CheckSink, MonitorScheduler};
use crate::storage::StorageEngine;
use crate::utils::{EngineError, EngineResult};

/// Database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "uptime-watcher.sqlite";

/// Internal event names the orchestrator rebroadcasts publicly
///
/// The fixed forwarding table: anything not listed here stays on its
/// manager bus.
const FORWARDED_INTERNAL_EVENTS: &[&str] = &[
    "internal:site:added",
    "internal:site:updated",
    "internal:site:removed",
    "internal:sites:state-synchronized",
    "internal:monitor:started",
    "internal:monitor:stopped",
    "internal:cache:invalidated",
    "internal:config:changed",
    "internal:database:transaction-completed",
    "internal:database:error",
    "internal:database:backup-created",
    "internal:database:backup-restored",
];

pub struct UptimeOrchestrator {
    config: EngineConfig,
    engine: Arc<StorageEngine>,
    registry: Arc<MonitorTypeRegistry>,
    migrations: Arc<MigrationRegistry>,
    public_bus: Arc<EventBus<EngineEvent>>,
    site_manager: Arc<SiteManager>,
    monitor_manager: Arc<MonitorManager>,
    database_manager: Arc<DatabaseManager>,
    /// Keeps the forwarding listeners registered for the engine's lifetime
    _forwards: Vec<Subscription<InternalEvent>>,
    shut_down: AtomicBool,
}

impl UptimeOrchestrator {
    /// Build and wire the whole engine
    ///
    /// Order: storage → repositories → registry → buses → scheduler →
    /// managers → event forwarding → scheduler rebuild from persisted
    /// state.
    pub async fn initialize(config: EngineConfig) -> EngineResult<Arc<Self>> {
        let data_dir = config
            .data_dir
            .clone()
            .ok_or_else(|| EngineError::validation("data_dir is required", vec![]))?;
        let engine = StorageEngine::initialize(&data_dir.join(DATABASE_FILE_NAME))?;

        let registry = Arc::new(MonitorTypeRegistry::new());
        register_builtin_types(&registry, &config)?;
        let migrations = Arc::new(MigrationRegistry::new());

        let public_bus = Arc::new(EventBus::<EngineEvent>::with_caps(
            "public",
            config.events.max_listeners_per_event,
            config.events.max_middleware,
        ));
        public_bus.add_middleware(Arc::new(LoggingMiddleware))?;
        public_bus.add_middleware(Arc::new(ValidationMiddleware::new(validate_public_event)))?;
        // Generous ceiling; guards consumers against pathological storms
        public_bus.add_middleware(Arc::new(RateLimitMiddleware::new(
            1_000,
            Duration::from_secs(10),
        )))?;

        let recorder = Arc::new(CheckRecorder::new(
            Arc::clone(&engine),
            Arc::clone(&public_bus),
            config.history.default_limit,
        ));
        let scheduler = Arc::new(MonitorScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&registry),
            Arc::clone(&recorder) as Arc<dyn CheckSink>,
        ));

        let monitor_manager = Arc::new(MonitorManager::new(
            Arc::clone(&engine),
            crate::storage::MonitorRepository::new(Arc::clone(&engine)),
            scheduler,
            Arc::new(EventBus::with_caps(
                "monitor-manager",
                config.events.max_listeners_per_event,
                config.events.max_middleware,
            )),
        ));
        let site_manager = Arc::new(SiteManager::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            Arc::new(EventBus::with_caps(
                "site-manager",
                config.events.max_listeners_per_event,
                config.events.max_middleware,
            )),
            Arc::clone(&monitor_manager) as Arc<dyn MonitoringOps>,
            &config.cache,
        ));
        let database_manager = Arc::new(DatabaseManager::new(
            Arc::clone(&engine),
            Arc::new(EventBus::with_caps(
                "database-manager",
                config.events.max_listeners_per_event,
                config.events.max_middleware,
            )),
            config.history.default_limit,
        ));

        let mut forwards = Vec::new();
        for bus in [
            site_manager.bus(),
            monitor_manager.bus(),
            database_manager.bus(),
        ] {
            forwards.extend(forward_bus(bus, &public_bus)?);
        }

        // No job state survives restart; monitoring flags are the truth
        let rebuilt = monitor_manager.rebuild_from_persisted().await?;
        tracing::info!("Engine initialized ({rebuilt} monitor(s) scheduled)");

        let orchestrator = Arc::new(Self {
            config,
            engine,
            registry,
            migrations,
            public_bus,
            site_manager,
            monitor_manager,
            database_manager,
            _forwards: forwards,
            shut_down: AtomicBool::new(false),
        });
        orchestrator
            .public_bus
            .emit(EngineEvent::SystemStartup(SystemPayload {
                context: Some("engine".into()),
                message: None,
            }));
        Ok(orchestrator)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn public_bus(&self) -> &Arc<EventBus<EngineEvent>> {
        &self.public_bus
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MonitorTypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn migrations(&self) -> &Arc<MigrationRegistry> {
        &self.migrations
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<MonitorScheduler> {
        self.monitor_manager.scheduler()
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    pub async fn get_sites(&self) -> EngineResult<Vec<Site>> {
        self.site_manager.get_sites().await
    }

    pub async fn get_site(&self, identifier: &str) -> EngineResult<Site> {
        self.site_manager.get_site(identifier).await
    }

    pub async fn add_site(&self, site: Site) -> EngineResult<Site> {
        self.site_manager.add_site(site).await
    }

    pub async fn update_site(&self, identifier: &str, updates: SiteUpdate) -> EngineResult<Site> {
        self.site_manager.update_site(identifier, updates).await
    }

    pub async fn remove_site(&self, identifier: &str) -> EngineResult<()> {
        self.site_manager.remove_site(identifier).await
    }

    pub async fn add_monitor(
        &self,
        site_identifier: &str,
        monitor: Monitor,
    ) -> EngineResult<Monitor> {
        self.site_manager.add_monitor(site_identifier, monitor).await
    }

    pub async fn remove_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> EngineResult<Site> {
        self.site_manager
            .remove_monitor(site_identifier, monitor_id)
            .await
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    pub async fn start_monitoring_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> EngineResult<bool> {
        self.monitor_manager
            .start_monitoring_for_site(identifier, monitor_id)
            .await
    }

    pub async fn stop_monitoring_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> EngineResult<bool> {
        self.monitor_manager
            .stop_monitoring_for_site(identifier, monitor_id)
            .await
    }

    /// Run a manual check and wait for its result
    ///
    /// Resolves the monitor, queues the manual run, then waits for the
    /// matching `monitor:check-completed` on the public bus.
    pub async fn check_now(
        &self,
        identifier: &str,
        monitor_id: &str,
    ) -> EngineResult<CheckOutcome> {
        let site = self.site_manager.get_site(identifier).await?;
        let monitor = site
            .monitor(monitor_id)
            .ok_or_else(|| EngineError::not_found("monitor", monitor_id))?
            .clone();

        // Buffer completions first, then dispatch: the job may settle
        // before this task runs again, and the result must not be lost.
        type Completed = (crate::utils::CorrelationId, CheckOutcome);
        let completions: Arc<Mutex<Vec<Completed>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::clone(&completions);
        let subscription =
            self.public_bus
                .subscribe("monitor:check-completed", move |envelope| {
                    if let EngineEvent::MonitorCheckCompleted(payload) = &envelope.payload {
                        buffer.lock().push((
                            payload.run_correlation.clone(),
                            CheckOutcome {
                                status: payload.status,
                                response_time_ms: payload.duration_ms,
                                details: payload.details.clone().unwrap_or_default(),
                                error: None,
                            },
                        ));
                    }
                    Ok(())
                })?;

        let correlation = match self.monitor_manager.check_site_now(identifier, monitor_id) {
            Ok(correlation) => correlation,
            Err(e) => {
                subscription.cancel();
                return Err(e);
            }
        };

        let deadline = Duration::from_millis(
            monitor
                .timeout_ms
                .saturating_add(self.config.scheduler.timeout_buffer_ms)
                .saturating_add(2_000),
        );
        let started = tokio::time::Instant::now();
        let outcome = loop {
            let found = completions
                .lock()
                .iter()
                .find(|(c, _)| *c == correlation)
                .map(|(_, outcome)| outcome.clone());
            if let Some(outcome) = found {
                break Some(outcome);
            }
            if started.elapsed() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        };
        subscription.cancel();

        outcome.ok_or_else(|| EngineError::Timeout(deadline.as_millis() as u64))
    }

    // ------------------------------------------------------------------
    // Settings & data
    // ------------------------------------------------------------------

    pub async fn get_history_limit(&self) -> EngineResult<u32> {
        self.database_manager.get_history_limit().await
    }

    pub async fn set_history_limit(&self, limit: u32) -> EngineResult<u32> {
        self.database_manager.set_history_limit(limit).await
    }

    pub async fn export_data(&self) -> EngineResult<PortableSnapshot> {
        self.database_manager.export_all().await
    }

    pub async fn import_data(&self, snapshot: &PortableSnapshot) -> EngineResult<ImportPreview> {
        self.database_manager.import_data(snapshot).await
    }

    /// Apply a previously previewed import, then resynchronize
    pub async fn persist_import(&self, snapshot: &PortableSnapshot) -> EngineResult<()> {
        self.database_manager.persist_import(snapshot).await?;
        self.site_manager.cache().invalidate_all("import");
        self.monitor_manager.rebuild_from_persisted().await?;
        Ok(())
    }

    pub async fn download_backup(&self) -> EngineResult<BackupArtifact> {
        self.database_manager.download_backup().await
    }

    /// Restore backup bytes, then resynchronize caches and jobs
    pub async fn restore_backup(
        &self,
        bytes: &[u8],
        claimed: Option<&BackupMetadata>,
    ) -> EngineResult<BackupMetadata> {
        let metadata = self.database_manager.restore_backup(bytes, claimed).await?;
        self.site_manager.cache().invalidate_all("restore");
        self.monitor_manager.rebuild_from_persisted().await?;
        Ok(metadata)
    }

    #[must_use]
    pub fn monitor_types(&self) -> Vec<MonitorTypeSummary> {
        self.registry.list().iter().map(|d| d.summary()).collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop timers, settle in-flight checks, close storage
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.public_bus
            .emit(EngineEvent::SystemShutdown(SystemPayload {
                context: Some("engine".into()),
                message: None,
            }));
        self.scheduler()
            .shutdown(Duration::from_millis(self.config.scheduler.shutdown_grace_ms))
            .await;
        self.engine.close();
        tracing::info!("Engine shut down");
    }
}

impl std::fmt::Debug for UptimeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UptimeOrchestrator")
            .field("jobs", &self.scheduler().job_count())
            .finish()
    }
}

/// Shared bootstrap: repeated `get_or_init` calls reuse one in-flight
/// initialization instead of racing two engines into the same directory
pub struct EngineBootstrap {
    config: EngineConfig,
    cell: tokio::sync::OnceCell<Arc<UptimeOrchestrator>>,
}

impl EngineBootstrap {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cell: tokio::sync::OnceCell::new(),
        }
    }

    pub async fn get_or_init(&self) -> EngineResult<Arc<UptimeOrchestrator>> {
        self.cell
            .get_or_try_init(|| UptimeOrchestrator::initialize(self.config.clone()))
            .await
            .cloned()
    }
}

/// Rewrite one internal event into its public counterpart
fn rewrite_internal(event: &InternalEvent) -> EngineEvent {
    match event.clone() {
        InternalEvent::SiteAdded(p) => EngineEvent::SiteAdded(p),
        InternalEvent::SiteUpdated(p) => EngineEvent::SiteUpdated(p),
        InternalEvent::SiteRemoved(p) => EngineEvent::SiteRemoved(p),
        InternalEvent::SitesStateSynchronized(p) => EngineEvent::SitesStateSynchronized(p),
        InternalEvent::MonitoringStarted(p) => EngineEvent::MonitoringStarted(p),
        InternalEvent::MonitoringStopped(p) => EngineEvent::MonitoringStopped(p),
        InternalEvent::CacheInvalidated(p) => EngineEvent::CacheInvalidated(p),
        InternalEvent::ConfigChanged(p) => EngineEvent::ConfigChanged(p),
        InternalEvent::DatabaseTransactionCompleted(p) => {
            EngineEvent::DatabaseTransactionCompleted(p)
        }
        InternalEvent::DatabaseError(p) => EngineEvent::DatabaseError(p),
        InternalEvent::BackupCreated(p) => EngineEvent::DatabaseBackupCreated(p),
        InternalEvent::BackupRestored(p) => EngineEvent::DatabaseBackupRestored(p),
    }
}

/// Subscribe the public bus to one manager bus's forwarded events
///
/// The payload is copied and re-emitted, so the public envelope carries
/// fresh metadata; the internal metadata never escapes.
fn forward_bus(
    bus: &Arc<EventBus<InternalEvent>>,
    public: &Arc<EventBus<EngineEvent>>,
) -> EngineResult<Vec<Subscription<InternalEvent>>> {
    let mut subscriptions = Vec::new();
    for event_name in FORWARDED_INTERNAL_EVENTS {
        let public = Arc::clone(public);
        subscriptions.push(bus.subscribe(event_name, move |envelope| {
            public.emit(rewrite_internal(&envelope.payload));
            Ok(())
        })?);
    }
    Ok(subscriptions)
}

/// Public-bus payload invariants enforced before listeners run
fn validate_public_event(event: &EngineEvent) -> Result<(), String> {
    match event {
        EngineEvent::MonitorStatusChanged(p)
        | EngineEvent::MonitorUp(p)
        | EngineEvent::MonitorDown(p) => {
            if p.site_identifier.is_empty() || p.monitor_id.is_empty() {
                return Err("status event with empty identifiers".into());
            }
            Ok(())
        }
        EngineEvent::SiteAdded(p) | EngineEvent::SiteUpdated(p) => {
            if p.site.identifier.trim().is_empty() {
                return Err("site event with empty identifier".into());
            }
            Ok(())
        }
        EngineEvent::SiteRemoved(p) => {
            if p.identifier.trim().is_empty() {
                return Err("site removal with empty identifier".into());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SitePayload, SiteRemovedPayload};

    #[test]
    fn test_rewrite_table_covers_backups() {
        let payload = crate::events::BackupEventPayload {
            size_bytes: 1,
            checksum_hex: "ab".into(),
            schema_version: 4,
        };
        let rewritten = rewrite_internal(&InternalEvent::BackupCreated(payload));
        assert_eq!(
            crate::events::BusEvent::name(&rewritten),
            "database:backup-created"
        );
    }

    #[test]
    fn test_forwarding_strips_internal_metadata() {
        let internal = Arc::new(EventBus::<InternalEvent>::new("site-manager"));
        let public = Arc::new(EventBus::<EngineEvent>::new("public"));
        let _subs = forward_bus(&internal, &public).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        public
            .subscribe("site:removed", move |envelope| {
                seen2
                    .lock()
                    .push((envelope.meta.bus_name.clone(), envelope.meta.event_name.clone()));
                Ok(())
            })
            .unwrap();

        internal.emit(InternalEvent::SiteRemoved(SiteRemovedPayload {
            identifier: "example".into(),
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        // Fresh metadata: public bus name, public event name
        assert_eq!(seen[0].0, "public");
        assert_eq!(seen[0].1, "site:removed");
    }

    #[test]
    fn test_public_event_validation_rejects_empty_site() {
        let site = crate::core::Site {
            identifier: "  ".into(),
            name: "X".into(),
            monitoring: false,
            monitors: vec![],
        };
        assert!(
            validate_public_event(&EngineEvent::SiteAdded(SitePayload { site })).is_err()
        );
    }
}
