//! Data portability: export, import, backup, restore, history limits
//!
//! Export and import speak a versioned portable snapshot; backups are the
//! raw database bytes produced by `VACUUM INTO` with SHA-256 metadata.
//! Restore validates everything it can before touching the live file,
//! takes a pre-restore snapshot, and swaps atomically.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{
    HISTORY_LIMIT_KEY, Monitor, Setting, Site, StatusRecord, now_ms,
};
use crate::events::{
    BackupEventPayload, EventBus, InternalEvent, SitesSyncPayload, TransactionPayload,
};
use crate::ops::{self, RetryPolicy};
use crate::storage::{
    HistoryRepository, MonitorRepository, SCHEMA_VERSION, SettingsRepository, SiteRepository,
    StorageEngine, schema,
};
use crate::utils::{EngineError, EngineResult, FieldIssue};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const MIN_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 10_000;
const BACKUP_RETENTION_HINT_DAYS: u32 = 30;

/// Versioned portable representation of the whole store
///
/// Reserved-prefix settings never leave the machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableSnapshot {
    pub schema_version: i64,
    pub app_version: String,
    pub created_at_ms: i64,
    /// Sites without their monitors; `monitors` is the flat set
    pub sites: Vec<Site>,
    pub monitors: Vec<Monitor>,
    pub history: Vec<StatusRecord>,
    pub settings: Vec<Setting>,
}

/// What an import would do, returned by the pure validate step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub sites_to_replace: usize,
    pub sites_incoming: usize,
    pub monitors_incoming: usize,
    pub history_entries_incoming: usize,
    pub settings_incoming: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub schema_version: i64,
    pub app_version: String,
    pub created_at_ms: i64,
    pub size_bytes: u64,
    pub checksum_hex: String,
    pub retention_hint_days: u32,
    pub original_path: String,
}

#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub bytes: Vec<u8>,
    pub metadata: BackupMetadata,
}

pub struct DatabaseManager {
    engine: Arc<StorageEngine>,
    bus: Arc<EventBus<InternalEvent>>,
    default_history_limit: u32,
    policy: RetryPolicy,
}

impl DatabaseManager {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        bus: Arc<EventBus<InternalEvent>>,
        default_history_limit: u32,
    ) -> Self {
        Self {
            engine,
            bus,
            default_history_limit,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus<InternalEvent>> {
        &self.bus
    }

    // ------------------------------------------------------------------
    // Export / import
    // ------------------------------------------------------------------

    /// Snapshot sites, monitors, capped history, and exportable settings
    pub async fn export_all(&self) -> EngineResult<PortableSnapshot> {
        let default_limit = self.default_history_limit;
        ops::run_hooked("data.export", &self.policy, None, None, || async move {
            self.engine.with_connection(|conn| {
                let sites = SiteRepository::get_all_internal(conn)?;
                let monitors = MonitorRepository::get_all_internal(conn)?;

                let limit = SettingsRepository::get_internal(conn, HISTORY_LIMIT_KEY)?
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(default_limit);
                let mut history = Vec::new();
                for monitor in &monitors {
                    history.extend(HistoryRepository::get_recent_internal(
                        conn, &monitor.id, limit,
                    )?);
                }

                let settings: Vec<Setting> = SettingsRepository::get_all_internal(conn)?
                    .into_iter()
                    .filter(|s| !s.is_reserved())
                    .collect();

                Ok(PortableSnapshot {
                    schema_version: SCHEMA_VERSION,
                    app_version: APP_VERSION.to_string(),
                    created_at_ms: now_ms(),
                    sites,
                    monitors,
                    history,
                    settings,
                })
            })
        })
        .await
    }

    /// Pure validate step; returns what a persist would replace
    pub async fn import_data(&self, snapshot: &PortableSnapshot) -> EngineResult<ImportPreview> {
        Self::validate_snapshot(snapshot)?;
        let current_sites = self
            .engine
            .with_connection(|conn| Ok(SiteRepository::get_all_internal(conn)?.len()))?;
        Ok(ImportPreview {
            sites_to_replace: current_sites,
            sites_incoming: snapshot.sites.len(),
            monitors_incoming: snapshot.monitors.len(),
            history_entries_incoming: snapshot.history.len(),
            settings_incoming: snapshot
                .settings
                .iter()
                .filter(|s| !s.is_reserved())
                .count(),
        })
    }

    /// Replace all current state with the snapshot, one transaction
    ///
    /// Reserved-prefix settings survive untouched; the caller rebuilds the
    /// scheduler and invalidates caches afterwards.
    pub async fn persist_import(&self, snapshot: &PortableSnapshot) -> EngineResult<()> {
        Self::validate_snapshot(snapshot)?;
        let started = std::time::Instant::now();

        ops::run_hooked("data.persist_import", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                SiteRepository::delete_all_internal(conn)?;
                for setting in SettingsRepository::get_all_internal(conn)? {
                    if !setting.is_reserved() {
                        SettingsRepository::delete_internal(conn, &setting.key)?;
                    }
                }

                for site in &snapshot.sites {
                    SiteRepository::upsert_internal(conn, site)?;
                }
                for monitor in &snapshot.monitors {
                    MonitorRepository::upsert_internal(conn, monitor)?;
                }
                for record in &snapshot.history {
                    HistoryRepository::append_internal(conn, record)?;
                }
                for setting in &snapshot.settings {
                    if !setting.is_reserved() {
                        SettingsRepository::set_internal(conn, &setting.key, &setting.value)?;
                    }
                }
                Ok(())
            })
        })
        .await?;

        self.bus.emit(InternalEvent::SitesStateSynchronized(SitesSyncPayload {
            site_count: snapshot.sites.len(),
        }));
        self.bus.emit(InternalEvent::DatabaseTransactionCompleted(
            TransactionPayload {
                operation: "data.persist_import".into(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        ));
        Ok(())
    }

    fn validate_snapshot(snapshot: &PortableSnapshot) -> EngineResult<()> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(EngineError::SchemaNewer {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut issues = Vec::new();
        let mut site_ids = std::collections::HashSet::new();
        for site in &snapshot.sites {
            if site.identifier.trim().is_empty() {
                issues.push(FieldIssue::new("sites", "site with empty identifier"));
            }
            if !site_ids.insert(site.identifier.as_str()) {
                issues.push(FieldIssue::new(
                    "sites",
                    format!("duplicate site '{}'", site.identifier),
                ));
            }
        }

        let mut monitor_ids = std::collections::HashSet::new();
        for monitor in &snapshot.monitors {
            if !site_ids.contains(monitor.site_identifier.as_str()) {
                issues.push(FieldIssue::new(
                    "monitors",
                    format!(
                        "monitor '{}' references unknown site '{}'",
                        monitor.id, monitor.site_identifier
                    ),
                ));
            }
            if !monitor_ids.insert(monitor.id.as_str()) {
                issues.push(FieldIssue::new(
                    "monitors",
                    format!("duplicate monitor '{}'", monitor.id),
                ));
            }
        }

        for record in &snapshot.history {
            if !monitor_ids.contains(record.monitor_id.as_str()) {
                issues.push(FieldIssue::new(
                    "history",
                    format!("history references unknown monitor '{}'", record.monitor_id),
                ));
                break; // one orphan is enough to reject
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::validation("import payload invalid", issues))
        }
    }

    // ------------------------------------------------------------------
    // Backup / restore
    // ------------------------------------------------------------------

    /// Snapshot the database via `VACUUM INTO` and checksum the bytes
    pub async fn download_backup(&self) -> EngineResult<BackupArtifact> {
        let staging = tempfile::tempdir()?;
        let snapshot_path = staging.path().join("uptime-watcher-backup.db");
        self.engine.vacuum_into(&snapshot_path)?;
        let bytes = std::fs::read(&snapshot_path)?;

        let metadata = BackupMetadata {
            schema_version: SCHEMA_VERSION,
            app_version: APP_VERSION.to_string(),
            created_at_ms: now_ms(),
            size_bytes: bytes.len() as u64,
            checksum_hex: hex::encode(Sha256::digest(&bytes)),
            retention_hint_days: BACKUP_RETENTION_HINT_DAYS,
            original_path: self.engine.path().display().to_string(),
        };

        self.bus.emit(InternalEvent::BackupCreated(BackupEventPayload {
            size_bytes: metadata.size_bytes,
            checksum_hex: metadata.checksum_hex.clone(),
            schema_version: metadata.schema_version,
        }));
        Ok(BackupArtifact { bytes, metadata })
    }

    /// Validate and atomically swap in backup bytes
    ///
    /// Order matters: every rejection (`VALIDATION`, `INTEGRITY_FAILED`,
    /// `SCHEMA_NEWER`) happens before the pre-restore snapshot is taken,
    /// so a failed restore leaves no artifacts behind.
    pub async fn restore_backup(
        &self,
        bytes: &[u8],
        claimed: Option<&BackupMetadata>,
    ) -> EngineResult<BackupMetadata> {
        if bytes.len() < SQLITE_MAGIC.len() || &bytes[..SQLITE_MAGIC.len()] != SQLITE_MAGIC {
            return Err(EngineError::validation(
                "backup bytes are not a database file",
                vec![],
            ));
        }

        let checksum_hex = hex::encode(Sha256::digest(bytes));
        if let Some(claimed) = claimed {
            if claimed.checksum_hex != checksum_hex {
                return Err(EngineError::IntegrityFailed("checksum mismatch".into()));
            }
            if claimed.schema_version > SCHEMA_VERSION {
                return Err(EngineError::SchemaNewer {
                    found: claimed.schema_version,
                    supported: SCHEMA_VERSION,
                });
            }
        }

        let db_path = self.engine.path().to_path_buf();
        let parent = db_path
            .parent()
            .ok_or_else(|| EngineError::internal("database path has no parent"))?;

        // Stage next to the live file so the final rename is atomic
        let staged = parent.join(format!("restore-staging-{}.db", now_ms()));
        std::fs::write(&staged, bytes)?;

        let inspected = Self::inspect_staged(&staged);
        let schema_version = match inspected {
            Ok(version) => version,
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                return Err(e);
            }
        };

        // All validation passed: take the pre-restore snapshot, then swap
        let pre_restore = parent.join(format!("pre-restore-{}.db", now_ms()));
        self.engine.vacuum_into(&pre_restore)?;
        tracing::info!("Pre-restore snapshot at {}", pre_restore.display());

        self.engine.close();
        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = parent.join(format!(
                "{}{suffix}",
                db_path.file_name().and_then(|n| n.to_str()).unwrap_or("")
            ));
            let _ = std::fs::remove_file(sidecar);
        }
        if let Err(e) = std::fs::rename(&staged, &db_path) {
            // Failed swap: bring the old database back up before bailing
            let _ = std::fs::remove_file(&staged);
            let _ = self.engine.reopen();
            return Err(e.into());
        }
        self.engine.reopen()?;

        let metadata = BackupMetadata {
            schema_version,
            app_version: APP_VERSION.to_string(),
            created_at_ms: now_ms(),
            size_bytes: bytes.len() as u64,
            checksum_hex,
            retention_hint_days: BACKUP_RETENTION_HINT_DAYS,
            original_path: db_path.display().to_string(),
        };
        self.bus.emit(InternalEvent::BackupRestored(BackupEventPayload {
            size_bytes: metadata.size_bytes,
            checksum_hex: metadata.checksum_hex.clone(),
            schema_version: metadata.schema_version,
        }));
        Ok(metadata)
    }

    /// Structural integrity + schema version of a staged backup file
    fn inspect_staged(staged: &Path) -> EngineResult<i64> {
        let conn = rusqlite::Connection::open(staged)?;
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict != "ok" {
            return Err(EngineError::IntegrityFailed(verdict));
        }
        let version = schema::read_schema_version(&conn)?;
        if version > SCHEMA_VERSION {
            return Err(EngineError::SchemaNewer {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(version)
    }

    // ------------------------------------------------------------------
    // History limit
    // ------------------------------------------------------------------

    pub async fn get_history_limit(&self) -> EngineResult<u32> {
        let default_limit = self.default_history_limit;
        let value = self.engine.with_connection(|conn| {
            Ok(SettingsRepository::get_internal(conn, HISTORY_LIMIT_KEY)?
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(default_limit))
        })?;
        Ok(value)
    }

    /// Persist a normalized limit and prune every monitor's history to it
    pub async fn set_history_limit(&self, requested: u32) -> EngineResult<u32> {
        let normalized = requested.clamp(MIN_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
        if normalized != requested {
            tracing::info!("History limit {requested} normalized to {normalized}");
        }

        ops::run_hooked("settings.set_history_limit", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                SettingsRepository::set_internal(
                    conn,
                    HISTORY_LIMIT_KEY,
                    &normalized.to_string(),
                )?;
                for monitor in MonitorRepository::get_all_internal(conn)? {
                    HistoryRepository::prune_internal(conn, &monitor.id, normalized)?;
                }
                Ok(())
            })
        })
        .await?;

        self.bus.emit(InternalEvent::ConfigChanged(
            crate::events::ConfigChangedPayload {
                key: HISTORY_LIMIT_KEY.to_string(),
                value: normalized.to_string(),
            },
        ));
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MonitorStatus;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<StorageEngine>,
        manager: DatabaseManager,
    }

    async fn seeded() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::initialize(&dir.path().join("watch.db")).unwrap();

        let sites = SiteRepository::new(Arc::clone(&engine));
        let monitors = MonitorRepository::new(Arc::clone(&engine));
        let history = HistoryRepository::new(Arc::clone(&engine));
        let settings = SettingsRepository::new(Arc::clone(&engine));

        for s in ["alpha", "beta", "gamma"] {
            sites
                .upsert(&Site {
                    identifier: s.into(),
                    name: s.to_uppercase(),
                    monitoring: true,
                    monitors: Vec::new(),
                })
                .await
                .unwrap();
            for n in 1..=2 {
                let mut monitor = Monitor::draft(format!("{s}-m{n}"), s, "http");
                monitor.url = Some(format!("http://{s}.example/m{n}"));
                monitor.check_interval_ms = 15_000;
                monitor.monitoring = true;
                monitors.upsert(&monitor).await.unwrap();
                for ts in 1..=3_i64 {
                    history
                        .append(&StatusRecord {
                            monitor_id: monitor.id.clone(),
                            timestamp_ms: ts,
                            status: MonitorStatus::Up,
                            response_time_ms: 10,
                            details: Some("200".into()),
                        })
                        .await
                        .unwrap();
                }
            }
        }
        settings.set(HISTORY_LIMIT_KEY, "500").await.unwrap();
        settings.set("cloud.syncToken", "secret").await.unwrap();

        let manager = DatabaseManager::new(
            Arc::clone(&engine),
            Arc::new(EventBus::new("database-manager")),
            500,
        );
        Fixture {
            _dir: dir,
            engine,
            manager,
        }
    }

    #[tokio::test]
    async fn test_export_excludes_reserved_settings() {
        let fx = seeded().await;
        let snapshot = fx.manager.export_all().await.unwrap();

        assert_eq!(snapshot.sites.len(), 3);
        assert_eq!(snapshot.monitors.len(), 6);
        assert_eq!(snapshot.history.len(), 18);
        assert!(snapshot.settings.iter().all(|s| !s.is_reserved()));
        assert!(snapshot.settings.iter().any(|s| s.key == HISTORY_LIMIT_KEY));
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_import_round_trip_preserves_state() {
        let fx = seeded().await;
        let snapshot = fx.manager.export_all().await.unwrap();

        // Wipe, preview, persist
        SiteRepository::new(Arc::clone(&fx.engine))
            .delete_all()
            .await
            .unwrap();
        let preview = fx.manager.import_data(&snapshot).await.unwrap();
        assert_eq!(preview.sites_to_replace, 0);
        assert_eq!(preview.sites_incoming, 3);
        assert_eq!(preview.monitors_incoming, 6);

        fx.manager.persist_import(&snapshot).await.unwrap();

        let restored = fx.manager.export_all().await.unwrap();
        assert_eq!(restored.sites, snapshot.sites);
        assert_eq!(restored.monitors, snapshot.monitors);
        assert_eq!(restored.settings, snapshot.settings);
        assert_eq!(restored.history.len(), snapshot.history.len());
    }

    #[tokio::test]
    async fn test_persist_import_keeps_reserved_settings() {
        let fx = seeded().await;
        let snapshot = fx.manager.export_all().await.unwrap();
        fx.manager.persist_import(&snapshot).await.unwrap();

        let settings = SettingsRepository::new(Arc::clone(&fx.engine));
        assert_eq!(
            settings.get("cloud.syncToken").await.unwrap().as_deref(),
            Some("secret")
        );
    }

    #[tokio::test]
    async fn test_import_rejects_newer_schema() {
        let fx = seeded().await;
        let mut snapshot = fx.manager.export_all().await.unwrap();
        snapshot.schema_version = SCHEMA_VERSION + 1;
        assert!(matches!(
            fx.manager.import_data(&snapshot).await.unwrap_err(),
            EngineError::SchemaNewer { .. }
        ));
    }

    #[tokio::test]
    async fn test_import_rejects_orphan_monitor() {
        let fx = seeded().await;
        let mut snapshot = fx.manager.export_all().await.unwrap();
        let mut orphan = Monitor::draft("ghost", "no-such-site", "http");
        orphan.check_interval_ms = 5_000;
        snapshot.monitors.push(orphan);
        assert!(matches!(
            fx.manager.import_data(&snapshot).await.unwrap_err(),
            EngineError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn test_backup_checksum_matches_bytes() {
        let fx = seeded().await;
        let artifact = fx.manager.download_backup().await.unwrap();

        assert!(artifact.bytes.starts_with(SQLITE_MAGIC));
        assert_eq!(
            artifact.metadata.checksum_hex,
            hex::encode(Sha256::digest(&artifact.bytes))
        );
        assert_eq!(artifact.metadata.size_bytes, artifact.bytes.len() as u64);
        assert_eq!(artifact.metadata.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip() {
        let fx = seeded().await;
        let before = fx.manager.export_all().await.unwrap();
        let artifact = fx.manager.download_backup().await.unwrap();

        // Mutate after the backup, then restore over it
        SiteRepository::new(Arc::clone(&fx.engine))
            .delete("alpha")
            .await
            .unwrap();

        let metadata = fx
            .manager
            .restore_backup(&artifact.bytes, Some(&artifact.metadata))
            .await
            .unwrap();
        assert_eq!(metadata.schema_version, SCHEMA_VERSION);

        let after = fx.manager.export_all().await.unwrap();
        assert_eq!(after.sites, before.sites);
        assert_eq!(after.monitors, before.monitors);
        assert_eq!(after.history.len(), before.history.len());
    }

    #[tokio::test]
    async fn test_restore_rejects_non_database_bytes() {
        let fx = seeded().await;
        let err = fx
            .manager
            .restore_backup(b"definitely not a database", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_restore_rejects_newer_claimed_schema_without_side_effects() {
        let fx = seeded().await;
        let artifact = fx.manager.download_backup().await.unwrap();

        let mut claimed = artifact.metadata.clone();
        claimed.schema_version = SCHEMA_VERSION + 1;
        let err = fx
            .manager
            .restore_backup(&artifact.bytes, Some(&claimed))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaNewer { .. }));

        // Validation failed first: no pre-restore snapshot, database intact
        let parent = fx.engine.path().parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with("pre-restore-") || name.starts_with("restore-staging-")
            })
            .collect();
        assert!(leftovers.is_empty(), "unexpected artifacts: {leftovers:?}");
        assert_eq!(fx.manager.export_all().await.unwrap().sites.len(), 3);
    }

    #[tokio::test]
    async fn test_restore_rejects_checksum_mismatch() {
        let fx = seeded().await;
        let artifact = fx.manager.download_backup().await.unwrap();
        let mut claimed = artifact.metadata.clone();
        claimed.checksum_hex = "0".repeat(64);
        assert!(matches!(
            fx.manager
                .restore_backup(&artifact.bytes, Some(&claimed))
                .await
                .unwrap_err(),
            EngineError::IntegrityFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_set_history_limit_normalizes_and_prunes() {
        let fx = seeded().await;
        // 3 rows per monitor seeded; floor is 10, so 2 clamps to 10
        let normalized = fx.manager.set_history_limit(2).await.unwrap();
        assert_eq!(normalized, MIN_HISTORY_LIMIT);

        let normalized = fx.manager.set_history_limit(50).await.unwrap();
        assert_eq!(normalized, 50);
        assert_eq!(fx.manager.get_history_limit().await.unwrap(), 50);

        let history = HistoryRepository::new(Arc::clone(&fx.engine));
        for monitor in ["alpha-m1", "beta-m2"] {
            assert!(history.get_recent(monitor, 100).await.unwrap().len() <= 50);
        }
    }
}
