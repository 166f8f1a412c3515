//! Storage engine: owns the embedded database connection
//!
//! A single connection serialized by a mutex. `execute_transaction` is the
//! only write path: it opens a `BEGIN IMMEDIATE` transaction, or a named
//! savepoint when the connection is already inside one, so internal
//! repository methods compose without caring about nesting depth.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::schema;
use crate::utils::{EngineError, EngineResult};

/// Sidecar suffixes SQLite may leave behind after an unclean exit
const STALE_SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Directory (next to the database) where stale sidecars are quarantined
const QUARANTINE_DIR: &str = "stale-lock-artifacts";

static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct StorageEngine {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl StorageEngine {
    /// Open (or create) the database, apply pragmas, and synchronize the
    /// schema
    ///
    /// A failed open is retried once after quarantining stale sidecar
    /// files, the recovery path for a crashed previous process holding
    /// the WAL hostage.
    pub fn initialize(path: &Path) -> EngineResult<Arc<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match open_and_prepare(path) {
            Ok(conn) => conn,
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "Database open failed ({e}); quarantining stale artifacts and retrying"
                );
                quarantine_stale_artifacts(path)?;
                open_and_prepare(path)?
            }
            Err(e) => return Err(e),
        };

        tracing::info!("Storage engine initialized at {}", path.display());
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a transaction (or a savepoint when one is active)
    ///
    /// Commit/release on success, rollback on error. `f` receives the
    /// live connection and may compose any number of `*_internal`
    /// repository calls; nested scopes inside `f` go through
    /// [`run_in_transaction`] on the same connection.
    pub fn execute_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| EngineError::internal("storage engine is closed"))?;
        run_in_transaction(conn, f)
    }

    /// Read-only access to the underlying connection
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| EngineError::internal("storage engine is closed"))?;
        f(conn)
    }

    /// Current `user_version` slot
    pub fn schema_version(&self) -> EngineResult<i64> {
        self.with_connection(|conn| Ok(schema::read_schema_version(conn)?))
    }

    /// Snapshot the live database into `dest` via `VACUUM INTO`
    pub fn vacuum_into(&self, dest: &Path) -> EngineResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "VACUUM INTO ?1",
                [dest.to_string_lossy().into_owned()],
            )?;
            Ok(())
        })
    }

    /// Close the connection; subsequent operations fail until [`Self::reopen`]
    ///
    /// Used by the restore flow to swap the database file underneath.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        if guard.take().is_some() {
            tracing::info!("Storage engine closed");
        }
    }

    /// Reopen after [`Self::close`], re-applying pragmas and migrations
    pub fn reopen(&self) -> EngineResult<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(open_and_prepare(&self.path)?);
        tracing::info!("Storage engine reopened at {}", self.path.display());
        Ok(())
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish()
    }
}

/// Transaction/savepoint branch shared by the engine and nested scopes
///
/// When the connection is in autocommit a real transaction is opened;
/// otherwise a uniquely-named savepoint is created so a failure rolls back
/// only the nested scope.
pub fn run_in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> EngineResult<T>,
) -> EngineResult<T> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = conn.execute_batch("ROLLBACK") {
                    tracing::error!("Rollback failed after {e}: {rb}");
                }
                Err(e)
            }
        }
    } else {
        let name = format!("sp_{}", SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed));
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match f(conn) {
            Ok(value) => {
                conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) =
                    conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    tracing::error!("Savepoint rollback failed after {e}: {rb}");
                }
                Err(e)
            }
        }
    }
}

fn open_and_prepare(path: &Path) -> EngineResult<Connection> {
    let conn = Connection::open(path)?;

    conn.busy_timeout(Duration::from_millis(5_000))?;
    // journal_mode returns a result row; the other pragmas do not
    let _mode: String =
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::ensure_schema(&conn)?;
    Ok(conn)
}

/// Move stale SQLite sidecar files into a quarantine directory
///
/// Never deletes: a human (or a bug report) may want them back.
fn quarantine_stale_artifacts(path: &Path) -> EngineResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::internal("database path has no parent directory"))?;
    let quarantine = parent.join(QUARANTINE_DIR);
    std::fs::create_dir_all(&quarantine)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::internal("database path has no file name"))?;

    for suffix in STALE_SIDECAR_SUFFIXES {
        let sidecar = parent.join(format!("{file_name}{suffix}"));
        if sidecar.exists() {
            let stamp = crate::core::now_ms();
            let target = quarantine.join(format!("{stamp}-{file_name}{suffix}"));
            tracing::warn!(
                "Quarantining stale artifact {} -> {}",
                sidecar.display(),
                target.display()
            );
            std::fs::rename(&sidecar, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_engine() -> (tempfile::TempDir, Arc<StorageEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::initialize(&dir.path().join("watch.db")).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_initialize_creates_schema() {
        let (_dir, engine) = temp_engine();
        let count: i64 = engine
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table'
                     AND name IN ('sites','monitors','history','settings')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(engine.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.db");
        let first = StorageEngine::initialize(&path).unwrap();
        let version_before = first.schema_version().unwrap();
        drop(first);

        let second = StorageEngine::initialize(&path).unwrap();
        assert_eq!(second.schema_version().unwrap(), version_before);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (_dir, engine) = temp_engine();

        let result: EngineResult<()> = engine.execute_transaction(|conn| {
            conn.execute(
                "INSERT INTO sites (identifier, name) VALUES ('a', 'A')",
                [],
            )?;
            Err(EngineError::internal("forced failure"))
        });
        assert!(result.is_err());

        let count: i64 = engine
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM sites", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_savepoint_rolls_back_nested_scope_only() {
        let (_dir, engine) = temp_engine();

        engine
            .execute_transaction(|conn| {
                conn.execute(
                    "INSERT INTO sites (identifier, name) VALUES ('outer', 'Outer')",
                    [],
                )?;
                // Nested scope fails; the outer insert must survive
                let nested: EngineResult<()> = run_in_transaction(conn, |conn| {
                    conn.execute(
                        "INSERT INTO sites (identifier, name) VALUES ('inner', 'Inner')",
                        [],
                    )?;
                    Err(EngineError::internal("nested failure"))
                });
                assert!(nested.is_err());
                Ok(())
            })
            .unwrap();

        let names: Vec<String> = engine
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT identifier FROM sites ORDER BY identifier")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(names, vec!["outer".to_string()]);
    }

    #[test]
    fn test_close_then_reopen() {
        let (_dir, engine) = temp_engine();
        engine.close();
        assert!(engine.with_connection(|_| Ok(())).is_err());
        engine.reopen().unwrap();
        assert!(engine.with_connection(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_vacuum_into_produces_valid_database() {
        let (dir, engine) = temp_engine();
        engine
            .execute_transaction(|conn| {
                conn.execute(
                    "INSERT INTO sites (identifier, name) VALUES ('a', 'A')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let snapshot = dir.path().join("snapshot.db");
        engine.vacuum_into(&snapshot).unwrap();

        let copy = Connection::open(&snapshot).unwrap();
        let count: i64 = copy
            .query_row("SELECT count(*) FROM sites", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
