use crate::error::StoreError;
use crate::store::DurableStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation; the caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// True when a `Database::new` failure means the file itself is damaged
pub fn is_corruption_error(e: &StoreError) -> bool {
    let text = e.to_string().to_lowercase();
    text.contains("corruption")
        || text.contains("integrity")
        || text.contains("malformed")
        || text.contains("not a database")
}

/// SQLite-backed durable store
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Lock the connection; a poisoned mutex means a panic happened mid-write
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| {
            StoreError::Poisoned(format!(
                "Database mutex poisoned: {}. Restart the application to recover.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // GUARD: detect corruption before touching the schema
        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        if integrity.to_lowercase() != "ok" {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Database corruption detected: {}", integrity),
            )));
        }

        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                e
            );
        }
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS local_store (
                namespace TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Run `op` inside BEGIN IMMEDIATE / COMMIT, rolling back on failure
    fn in_transaction<F>(conn: &Connection, context: &str, op: F) -> SqliteResult<()>
    where
        F: FnOnce(&Connection) -> SqliteResult<()>,
    {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", []).map_err(|e| {
            log_io_error_if_any(context, &e);
            error!("[DB] Failed to begin transaction ({}): {}", context, e);
            e
        })?;

        match op(conn) {
            Ok(()) => conn.execute("COMMIT", []).map(|_| ()).map_err(|e| {
                log_io_error_if_any(context, &e);
                error!("[DB] Failed to commit transaction ({}): {}", context, e);
                let _ = conn.execute("ROLLBACK", []);
                e
            }),
            Err(e) => {
                log_io_error_if_any(context, &e);
                error!("[DB] {} failed: {}. Rolling back transaction.", context, e);
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

impl DurableStore for Database {
    fn write(&self, namespace: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();
        Self::in_transaction(&conn, "local_store write", |c| {
            c.execute(
                "INSERT INTO local_store (namespace, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace) DO UPDATE SET value = ?2, updated_at = ?3",
                params![namespace, value, now],
            )
            .map(|_| ())
        })?;
        Ok(())
    }

    fn read(&self, namespace: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_store WHERE namespace = ?1",
                params![namespace],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn delete(&self, namespace: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        Self::in_transaction(&conn, "local_store delete", |c| {
            c.execute(
                "DELETE FROM local_store WHERE namespace = ?1",
                params![namespace],
            )
            .map(|_| ())
        })?;
        Ok(())
    }
}
