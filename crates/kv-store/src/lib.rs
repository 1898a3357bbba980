//! Key-value storage for cached thumbnails.
//!
//! A store maps string keys to opaque byte values. Absence is not an error:
//! `get` returns `Ok(None)` for a missing key, and `Err` only for a genuine
//! failure of the backend.
//!
//! Two backends are provided with identical semantics:
//! - [`MemoryKeyValue`]: process-lifetime map, values copied on write
//! - [`SqliteKeyValue`]: single-table SQLite database in WAL mode

mod sqlite;

pub use sqlite::SqliteKeyValue;

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Errors produced by a key-value backend.
#[derive(Debug, Error)]
pub enum KvError {
    /// The store was closed and can no longer be used.
    #[error("key-value store is closed")]
    Closed,

    /// SQLite reported a failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure while preparing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Minimal storage contract consumed by the thumbnail cache.
///
/// Implementations must be safe to share between threads.
pub trait KeyValue: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Release the underlying resources. Calling it twice is a no-op.
    fn close(&self) -> Result<()>;
}

impl<T: KeyValue + ?Sized> KeyValue for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<T: KeyValue + ?Sized> KeyValue for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// In-memory store, mainly for tests and embedding.
#[derive(Debug)]
pub struct MemoryKeyValue {
    // None once closed
    entries: Mutex<Option<HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Number of stored entries (0 after close).
    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyValue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValue for MemoryKeyValue {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.entries.lock();
        let entries = guard.as_ref().ok_or(KvError::Closed)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut guard = self.entries.lock();
        let entries = guard.as_mut().ok_or(KvError::Closed)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.entries.lock().take();
        Ok(())
    }
}
