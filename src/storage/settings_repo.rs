//! Settings repository: string key/value pairs

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use super::engine::StorageEngine;
use super::mapper::map_setting_row;
use crate::core::Setting;
use crate::ops::{self, RetryPolicy};
use crate::utils::EngineResult;

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    engine: Arc<StorageEngine>,
    policy: RetryPolicy,
}

impl SettingsRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            policy: RetryPolicy::default(),
        }
    }

    pub async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        ops::run_hooked("settings.get", &self.policy, None, None, || async move {
            self.engine
                .with_connection(|conn| Self::get_internal(conn, key))
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        ops::run_hooked("settings.set", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::set_internal(conn, key, value))
        })
        .await
    }

    pub async fn get_all(&self) -> EngineResult<Vec<Setting>> {
        ops::run_hooked("settings.get_all", &self.policy, None, None, || async move {
            self.engine.with_connection(Self::get_all_internal)
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> EngineResult<bool> {
        ops::run_hooked("settings.delete", &self.policy, None, None, || async move {
            self.engine
                .execute_transaction(|conn| Self::delete_internal(conn, key))
        })
        .await
    }

    // ------------------------------------------------------------------

    pub fn get_internal(conn: &Connection, key: &str) -> EngineResult<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_internal(conn: &Connection, key: &str, value: &str) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_all_internal(conn: &Connection) -> EngineResult<Vec<Setting>> {
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], map_setting_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(settings)
    }

    pub fn delete_internal(conn: &Connection, key: &str) -> EngineResult<bool> {
        let rows = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}
