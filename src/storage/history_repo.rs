//! Status-history repository
//!
//! Append-only per monitor, pruned to the configured history limit on
//! write. Rows are ordered by `(timestamp, id)` so same-millisecond
//! entries keep insertion order.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use super::engine::StorageEngine;
use super::mapper::{HISTORY_COLUMNS, map_history_row};
use crate::core::StatusRecord;
use crate::ops::{self, RetryPolicy};
use crate::utils::EngineResult;

#[derive(Debug, Clone)]
pub struct HistoryRepository {
    engine: Arc<StorageEngine>,
    policy: RetryPolicy,
}

impl HistoryRepository {
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

    pub async fn append(&self, record: &StatusRecord) -> EngineResult<()> {
        ops::run_hooked("history.append", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::append_internal(conn, record))
        })
        .await
    }

    /// Most recent `limit` records, newest first
    pub async fn get_recent(
        &self,
        monitor_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<StatusRecord>> {
        ops::run_hooked("history.get_recent", &self.policy, None, None, || async move {
            self.engine
                .with_connection(|conn| Self::get_recent_internal(conn, monitor_id, limit))
        })
        .await
    }

    pub async fn prune(&self, monitor_id: &str, max_entries: u32) -> EngineResult<usize> {
        ops::run_hooked("history.prune", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::prune_internal(conn, monitor_id, max_entries))
        })
        .await
    }

    pub async fn delete_for_monitor(&self, monitor_id: &str) -> EngineResult<usize> {
        ops::run_hooked("history.delete_for_monitor", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::delete_for_monitor_internal(conn, monitor_id))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Internal methods
    // ------------------------------------------------------------------

    pub fn append_internal(conn: &Connection, record: &StatusRecord) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO history (monitor_id, timestamp, status, response_time_ms, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.monitor_id,
                record.timestamp_ms,
                record.status.to_string(),
                record.response_time_ms as i64,
                record.details,
            ],
        )?;
        Ok(())
    }

    pub fn get_recent_internal(
        conn: &Connection,
        monitor_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<StatusRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE monitor_id = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(params![monitor_id, i64::from(limit)], map_history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn latest_internal(
        conn: &Connection,
        monitor_id: &str,
    ) -> EngineResult<Option<StatusRecord>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM history WHERE monitor_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![monitor_id],
                map_history_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_for_internal(conn: &Connection, monitor_id: &str) -> EngineResult<u32> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM history WHERE monitor_id = ?1",
            params![monitor_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }

    /// Delete everything beyond the newest `max_entries` rows
    pub fn prune_internal(
        conn: &Connection,
        monitor_id: &str,
        max_entries: u32,
    ) -> EngineResult<usize> {
        let rows = conn.execute(
            "DELETE FROM history WHERE monitor_id = ?1 AND id NOT IN (
                 SELECT id FROM history WHERE monitor_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2
             )",
            params![monitor_id, i64::from(max_entries)],
        )?;
        Ok(rows)
    }

    pub fn delete_for_monitor_internal(
        conn: &Connection,
        monitor_id: &str,
    ) -> EngineResult<usize> {
        let rows = conn.execute(
            "DELETE FROM history WHERE monitor_id = ?1",
            params![monitor_id],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Monitor, MonitorStatus, Site};
    use crate::storage::{MonitorRepository, SiteRepository};

    async fn temp_repo() -> (tempfile::TempDir, HistoryRepository) {
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
        monitor.check_interval_ms = 5_000;
        MonitorRepository::new(Arc::clone(&engine))
            .upsert(&monitor)
            .await
            .unwrap();
        (dir, HistoryRepository::new(engine))
    }

    fn record(ts: i64, status: MonitorStatus) -> StatusRecord {
        StatusRecord {
            monitor_id: "m1".into(),
            timestamp_ms: ts,
            status,
            response_time_ms: 12,
            details: Some("200".into()),
        }
    }

    #[tokio::test]
    async fn test_append_and_get_recent_newest_first() {
        let (_dir, repo) = temp_repo().await;
        for ts in [100, 200, 300] {
            repo.append(&record(ts, MonitorStatus::Up)).await.unwrap();
        }

        let recent = repo.get_recent("m1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp_ms, 300);
        assert_eq!(recent[1].timestamp_ms, 200);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_entries() {
        let (_dir, repo) = temp_repo().await;
        for ts in 1..=10 {
            repo.append(&record(ts, MonitorStatus::Up)).await.unwrap();
        }

        let deleted = repo.prune("m1", 4).await.unwrap();
        assert_eq!(deleted, 6);

        let remaining = repo.get_recent("m1", 100).await.unwrap();
        let stamps: Vec<i64> = remaining.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![10, 9, 8, 7]);
    }

    #[tokio::test]
    async fn test_prune_below_limit_is_noop() {
        let (_dir, repo) = temp_repo().await;
        repo.append(&record(1, MonitorStatus::Down)).await.unwrap();
        assert_eq!(repo.prune("m1", 500).await.unwrap(), 0);
        assert_eq!(repo.get_recent("m1", 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let (_dir, repo) = temp_repo().await;
        repo.append(&record(100, MonitorStatus::Up)).await.unwrap();
        repo.append(&record(100, MonitorStatus::Down)).await.unwrap();

        let recent = repo.get_recent("m1", 10).await.unwrap();
        // Newest-first: the later insert wins the tie
        assert_eq!(recent[0].status, MonitorStatus::Down);
        assert_eq!(recent[1].status, MonitorStatus::Up);
    }

    #[tokio::test]
    async fn test_delete_for_monitor() {
        let (_dir, repo) = temp_repo().await;
        for ts in [1, 2, 3] {
            repo.append(&record(ts, MonitorStatus::Up)).await.unwrap();
        }
        assert_eq!(repo.delete_for_monitor("m1").await.unwrap(), 3);
        assert!(repo.get_recent("m1", 10).await.unwrap().is_empty());
    }
}
