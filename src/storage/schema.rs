//! Schema DDL and the `user_version` upgrade policy
//!
//! Upgrades are forward-only and idempotent: tables and indexes use
//! `IF NOT EXISTS`, monitor-type columns are added with
//! `ALTER TABLE … ADD COLUMN` when absent. A database written by a newer
//! build fails closed.

use rusqlite::Connection;

use crate::utils::{EngineError, EngineResult};

/// Schema version this build reads and writes
pub const SCHEMA_VERSION: i64 = 4;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS sites (
    identifier TEXT PRIMARY KEY NOT NULL CHECK(length(trim(identifier)) > 0),
    name TEXT NOT NULL CHECK(length(trim(name)) > 0),
    monitoring INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now') * 1000),
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now') * 1000)
);

CREATE TABLE IF NOT EXISTS monitors (
    id TEXT PRIMARY KEY NOT NULL CHECK(length(trim(id)) > 0),
    site_identifier TEXT NOT NULL,
    type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    check_interval_ms INTEGER NOT NULL,
    timeout_ms INTEGER NOT NULL,
    retry_attempts INTEGER NOT NULL DEFAULT 0,
    monitoring INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY(site_identifier) REFERENCES sites(identifier) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    status TEXT NOT NULL,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    details TEXT,
    FOREIGN KEY(monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_monitors_site_id
    ON monitors(site_identifier, id);
CREATE INDEX IF NOT EXISTS idx_history_monitor_ts
    ON history(monitor_id, timestamp DESC);
";

/// Type-specific monitor columns known to this build
///
/// The registry's field descriptors map onto these; a future monitor type
/// extends the list and existing databases pick the new columns up on the
/// next startup.
pub const MONITOR_TYPE_COLUMNS: &[(&str, &str)] = &[
    ("url", "TEXT"),
    ("host", "TEXT"),
    ("port", "INTEGER"),
    ("record_type", "TEXT"),
    ("expected_value", "TEXT"),
    ("status_codes", "TEXT"),
    ("header_name", "TEXT"),
    ("keyword", "TEXT"),
    ("json_path", "TEXT"),
    ("latency_threshold_ms", "INTEGER"),
    ("expiry_warning_days", "INTEGER"),
];

/// Create or upgrade the schema, then stamp `user_version`
///
/// Fails closed when the stored version is newer than [`SCHEMA_VERSION`].
pub fn ensure_schema(conn: &Connection) -> EngineResult<()> {
    let stored = read_schema_version(conn)?;
    if stored > SCHEMA_VERSION {
        return Err(EngineError::SchemaNewer {
            found: stored,
            supported: SCHEMA_VERSION,
        });
    }

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let applied: EngineResult<()> = (|| {
        conn.execute_batch(CREATE_TABLES)?;
        ensure_monitor_columns(conn)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    })();
    match applied {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            if stored < SCHEMA_VERSION {
                tracing::info!("Schema upgraded from v{stored} to v{SCHEMA_VERSION}");
            }
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Add any missing type-specific monitor columns
pub fn ensure_monitor_columns(conn: &Connection) -> EngineResult<()> {
    let existing = monitor_column_names(conn)?;
    for (name, decl) in MONITOR_TYPE_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            tracing::debug!("Adding monitor column '{name}'");
            conn.execute_batch(&format!("ALTER TABLE monitors ADD COLUMN {name} {decl}"))?;
        }
    }
    Ok(())
}

pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn monitor_column_names(conn: &Connection) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(monitors)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
