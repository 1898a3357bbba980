//! SQLite-backed persistent store.
//!
//! All entries live in a single `entries` table keyed by the cache key.
//! WAL mode lets several processes read while one writes; within a process
//! the connection is guarded by a mutex.

use crate::{KeyValue, KvError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Persistent key-value store on top of an embedded SQLite database.
pub struct SqliteKeyValue {
    conn: Mutex<Option<Connection>>,
    db_path: PathBuf,
}

impl SqliteKeyValue {
    /// Open or create a database at `db_path`, creating parent directories.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Self::create_tables(&conn)?;

        debug!("opened thumbnail store at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            db_path: db_path.to_path_buf(),
        })
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

impl KeyValue for SqliteKeyValue {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(KvError::Closed)?;
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(KvError::Closed)?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        match conn.close() {
            Ok(()) => Ok(()),
            Err((conn, e)) => {
                *guard = Some(conn);
                Err(e.into())
            }
        }
    }
}
