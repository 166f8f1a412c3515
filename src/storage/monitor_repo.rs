//! Monitor repository
//!
//! The upsert writes the full dynamic column set; which columns a monitor
//! actually uses is the registry's concern, not the repository's.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use super::engine::StorageEngine;
use super::mapper::{MONITOR_COLUMNS, map_monitor_row};
use crate::core::{Monitor, MonitorStatus};
use crate::ops::{self, RetryPolicy};
use crate::utils::EngineResult;

#[derive(Debug, Clone)]
pub struct MonitorRepository {
    engine: Arc<StorageEngine>,
    policy: RetryPolicy,
}

impl MonitorRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            policy: RetryPolicy::default(),
        }
    }

    // ------------------------------------------------------------------
    // Public methods
    // ------------------------------------------------------------------

    pub async fn get_by_site(&self, site_identifier: &str) -> EngineResult<Vec<Monitor>> {
        ops::run_hooked("monitor.get_by_site", &self.policy, None, None, || async move {
            self.engine
                .with_connection(|conn| Self::get_by_site_internal(conn, site_identifier))
        })
        .await
    }

    pub async fn get_by_id(&self, monitor_id: &str) -> EngineResult<Option<Monitor>> {
        ops::run_hooked("monitor.get_by_id", &self.policy, None, None, || async move {
            self.engine
                .with_connection(|conn| Self::get_by_id_internal(conn, monitor_id))
        })
        .await
    }

    pub async fn upsert(&self, monitor: &Monitor) -> EngineResult<()> {
        ops::run_hooked("monitor.upsert", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::upsert_internal(conn, monitor))
        })
        .await
    }

    pub async fn delete(&self, monitor_id: &str) -> EngineResult<bool> {
        ops::run_hooked("monitor.delete", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::delete_internal(conn, monitor_id))
        })
        .await
    }

    /// Replace a site's entire monitor set in one transaction
    pub async fn bulk_replace(
        &self,
        site_identifier: &str,
        monitors: &[Monitor],
    ) -> EngineResult<()> {
        ops::run_hooked("monitor.bulk_replace", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                Self::bulk_replace_internal(conn, site_identifier, monitors)
            })
        })
        .await
    }

    /// Monitors with `monitoring = true`, used to rebuild the scheduler
    pub async fn all_monitoring(&self) -> EngineResult<Vec<Monitor>> {
        ops::run_hooked("monitor.all_monitoring", &self.policy, None, None, || async move {
            self.engine.with_connection(Self::all_monitoring_internal)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Internal methods
    // ------------------------------------------------------------------

    pub fn get_by_site_internal(
        conn: &Connection,
        site_identifier: &str,
    ) -> EngineResult<Vec<Monitor>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE site_identifier = ?1 ORDER BY id"
        ))?;
        let monitors = stmt
            .query_map(params![site_identifier], map_monitor_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(monitors)
    }

    pub fn get_by_id_internal(
        conn: &Connection,
        monitor_id: &str,
    ) -> EngineResult<Option<Monitor>> {
        let monitor = conn
            .query_row(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?1"),
                params![monitor_id],
                map_monitor_row,
            )
            .optional()?;
        Ok(monitor)
    }

    pub fn get_all_internal(conn: &Connection) -> EngineResult<Vec<Monitor>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY site_identifier, id"
        ))?;
        let monitors = stmt
            .query_map([], map_monitor_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(monitors)
    }

    pub fn all_monitoring_internal(conn: &Connection) -> EngineResult<Vec<Monitor>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE monitoring = 1
             ORDER BY site_identifier, id"
        ))?;
        let monitors = stmt
            .query_map([], map_monitor_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(monitors)
    }

    pub fn upsert_internal(conn: &Connection, monitor: &Monitor) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO monitors
                (id, site_identifier, type, status, check_interval_ms, timeout_ms,
                 retry_attempts, monitoring, url, host, port, record_type, expected_value,
                 status_codes, header_name, keyword, json_path, latency_threshold_ms,
                 expiry_warning_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19)
             ON CONFLICT(id) DO UPDATE SET
                 site_identifier = excluded.site_identifier,
                 type = excluded.type,
                 status = excluded.status,
                 check_interval_ms = excluded.check_interval_ms,
                 timeout_ms = excluded.timeout_ms,
                 retry_attempts = excluded.retry_attempts,
                 monitoring = excluded.monitoring,
                 url = excluded.url,
                 host = excluded.host,
                 port = excluded.port,
                 record_type = excluded.record_type,
                 expected_value = excluded.expected_value,
                 status_codes = excluded.status_codes,
                 header_name = excluded.header_name,
                 keyword = excluded.keyword,
                 json_path = excluded.json_path,
                 latency_threshold_ms = excluded.latency_threshold_ms,
                 expiry_warning_days = excluded.expiry_warning_days",
            params![
                monitor.id,
                monitor.site_identifier,
                monitor.monitor_type,
                monitor.status.to_string(),
                monitor.check_interval_ms as i64,
                monitor.timeout_ms as i64,
                i64::from(monitor.retry_attempts),
                i64::from(monitor.monitoring),
                monitor.url,
                monitor.host,
                monitor.port.map(i64::from),
                monitor.record_type,
                monitor.expected_value,
                monitor.status_codes,
                monitor.header_name,
                monitor.keyword,
                monitor.json_path,
                monitor.latency_threshold_ms.map(|v| v as i64),
                monitor.expiry_warning_days.map(i64::from),
            ],
        )?;
        Ok(())
    }

    /// Status-only write for the scheduler's hot path
    pub fn update_status_internal(
        conn: &Connection,
        monitor_id: &str,
        status: MonitorStatus,
    ) -> EngineResult<()> {
        conn.execute(
            "UPDATE monitors SET status = ?1 WHERE id = ?2",
            params![status.to_string(), monitor_id],
        )?;
        Ok(())
    }

    pub fn set_monitoring_internal(
        conn: &Connection,
        monitor_id: &str,
        monitoring: bool,
    ) -> EngineResult<bool> {
        let rows = conn.execute(
            "UPDATE monitors SET monitoring = ?1 WHERE id = ?2",
            params![i64::from(monitoring), monitor_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_internal(conn: &Connection, monitor_id: &str) -> EngineResult<bool> {
        let rows = conn.execute("DELETE FROM monitors WHERE id = ?1", params![monitor_id])?;
        Ok(rows > 0)
    }

    pub fn delete_by_site_internal(
        conn: &Connection,
        site_identifier: &str,
    ) -> EngineResult<usize> {
        let rows = conn.execute(
            "DELETE FROM monitors WHERE site_identifier = ?1",
            params![site_identifier],
        )?;
        Ok(rows)
    }

    pub fn bulk_replace_internal(
        conn: &Connection,
        site_identifier: &str,
        monitors: &[Monitor],
    ) -> EngineResult<()> {
        Self::delete_by_site_internal(conn, site_identifier)?;
        for monitor in monitors {
            Self::upsert_internal(conn, monitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SiteRepository;

    async fn temp_repo() -> (tempfile::TempDir, Arc<StorageEngine>, MonitorRepository) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::initialize(&dir.path().join("watch.db")).unwrap();
        let sites = SiteRepository::new(Arc::clone(&engine));
        sites
            .upsert(&crate::core::Site {
                identifier: "s".into(),
                name: "S".into(),
                monitoring: true,
                monitors: Vec::new(),
            })
            .await
            .unwrap();
        let repo = MonitorRepository::new(Arc::clone(&engine));
        (dir, engine, repo)
    }

    fn http_monitor(id: &str, monitoring: bool) -> Monitor {
        let mut m = Monitor::draft(id, "s", "http");
        m.url = Some(format!("http://example.com/{id}"));
        m.check_interval_ms = 5_000;
        m.monitoring = monitoring;
        m
    }

    #[tokio::test]
    async fn test_upsert_round_trips_all_fields() {
        let (_dir, _engine, repo) = temp_repo().await;
        let mut monitor = http_monitor("m1", true);
        monitor.latency_threshold_ms = Some(250);
        monitor.status_codes = Some("200,301-399".into());

        repo.upsert(&monitor).await.unwrap();
        let loaded = repo.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(loaded, monitor);
    }

    #[tokio::test]
    async fn test_update_status_touches_only_status() {
        let (_dir, engine, repo) = temp_repo().await;
        repo.upsert(&http_monitor("m1", true)).await.unwrap();

        engine
            .execute_transaction(|conn| {
                MonitorRepository::update_status_internal(conn, "m1", MonitorStatus::Up)
            })
            .unwrap();

        let loaded = repo.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(loaded.status, MonitorStatus::Up);
        assert_eq!(loaded.url.as_deref(), Some("http://example.com/m1"));
    }

    #[tokio::test]
    async fn test_all_monitoring_filters_disabled() {
        let (_dir, _engine, repo) = temp_repo().await;
        repo.upsert(&http_monitor("m1", true)).await.unwrap();
        repo.upsert(&http_monitor("m2", false)).await.unwrap();

        let active = repo.all_monitoring().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "m1");
    }

    #[tokio::test]
    async fn test_bulk_replace_swaps_monitor_set() {
        let (_dir, _engine, repo) = temp_repo().await;
        repo.upsert(&http_monitor("old1", true)).await.unwrap();
        repo.upsert(&http_monitor("old2", true)).await.unwrap();

        let replacement = vec![http_monitor("new1", true)];
        repo.bulk_replace("s", &replacement).await.unwrap();

        let monitors = repo.get_by_site("s").await.unwrap();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].id, "new1");
    }

    #[tokio::test]
    async fn test_missing_site_violates_foreign_key() {
        let (_dir, _engine, repo) = temp_repo().await;
        let mut monitor = http_monitor("m1", true);
        monitor.site_identifier = "no-such-site".into();
        assert!(repo.upsert(&monitor).await.is_err());
    }
}
