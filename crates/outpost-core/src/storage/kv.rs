//! Durable key-value storage
//!
//! The queue and cache only ever talk to storage through [`KeyValueStore`].
//! Implementations must make a single `set` crash-safe: after `set` returns
//! `Ok`, the value survives a process crash.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};

/// Key-value persistence with get/set/remove
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// JSON helpers on top of any [`KeyValueStore`]
pub trait JsonStoreExt {
    /// Read and decode a JSON value, `None` if the key is absent
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>>;
    /// Encode and write a JSON value
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()>;
}

impl<S: KeyValueStore + ?Sized> JsonStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::CorruptEntry {
                key: key.to_string(),
                details: e.to_string(),
            })
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &raw)
    }
}

/// SQLite-backed store
///
/// Runs in WAL mode with `synchronous = FULL`, so each committed upsert
/// is durable once `set` returns.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        // journal_mode reports the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened key-value store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored keys
    pub fn len(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }
}

/// In-memory store
///
/// Writes can be switched off with [`MemoryStore::reject_writes`] to
/// exercise the failure paths of callers.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail until switched back
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_writable(&self, key: &str) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected {
                key: key.to_string(),
                reason: "store is rejecting writes".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_writable(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_writable(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}
