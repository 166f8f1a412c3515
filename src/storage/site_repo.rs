//! Site repository
//!
//! Sites come out of this repository without their monitors; managers
//! compose the aggregate from [`crate::storage::MonitorRepository`].

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use super::engine::StorageEngine;
use super::mapper::{SITE_COLUMNS, map_site_row};
use crate::core::Site;
use crate::ops::{self, RetryPolicy};
use crate::utils::EngineResult;

#[derive(Debug, Clone)]
pub struct SiteRepository {
    engine: Arc<StorageEngine>,
    policy: RetryPolicy,
}

impl SiteRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            policy: RetryPolicy::default(),
        }
    }

    // ------------------------------------------------------------------
    // Public methods: own their transaction, wrapped by the hook
    // ------------------------------------------------------------------

    pub async fn get_all(&self) -> EngineResult<Vec<Site>> {
        ops::run_hooked("site.get_all", &self.policy, None, None, || async move {
            self.engine.with_connection(Self::get_all_internal)
        })
        .await
    }

    pub async fn get_by_identifier(&self, identifier: &str) -> EngineResult<Option<Site>> {
        ops::run_hooked("site.get_by_identifier", &self.policy, None, None, || async move {
            self.engine
                .with_connection(|conn| Self::get_by_identifier_internal(conn, identifier))
        })
        .await
    }

    pub async fn upsert(&self, site: &Site) -> EngineResult<()> {
        ops::run_hooked("site.upsert", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::upsert_internal(conn, site))
        })
        .await
    }

    pub async fn delete(&self, identifier: &str) -> EngineResult<bool> {
        ops::run_hooked("site.delete", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::delete_internal(conn, identifier))
        })
        .await
    }

    pub async fn delete_all(&self) -> EngineResult<()> {
        ops::run_hooked("site.delete_all", &self.policy, None, None, || async move {
            self.engine.execute_transaction(Self::delete_all_internal)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Internal methods: run inside the caller's transaction
    // ------------------------------------------------------------------

    pub fn get_all_internal(conn: &Connection) -> EngineResult<Vec<Site>> {
        let mut stmt =
            conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY identifier"))?;
        let sites = stmt
            .query_map([], map_site_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    pub fn get_by_identifier_internal(
        conn: &Connection,
        identifier: &str,
    ) -> EngineResult<Option<Site>> {
        let site = conn
            .query_row(
                &format!("SELECT {SITE_COLUMNS} FROM sites WHERE identifier = ?1"),
                params![identifier],
                map_site_row,
            )
            .optional()?;
        Ok(site)
    }

    pub fn exists_internal(conn: &Connection, identifier: &str) -> EngineResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sites WHERE identifier = ?1",
            params![identifier],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn upsert_internal(conn: &Connection, site: &Site) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO sites (identifier, name, monitoring)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identifier) DO UPDATE SET
                 name = excluded.name,
                 monitoring = excluded.monitoring,
                 updated_at = strftime('%s','now') * 1000",
            params![site.identifier, site.name, i64::from(site.monitoring)],
        )?;
        Ok(())
    }

    pub fn delete_internal(conn: &Connection, identifier: &str) -> EngineResult<bool> {
        let rows = conn.execute(
            "DELETE FROM sites WHERE identifier = ?1",
            params![identifier],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_all_internal(conn: &Connection) -> EngineResult<()> {
        conn.execute("DELETE FROM sites", [])?;
        Ok(())
    }
}
