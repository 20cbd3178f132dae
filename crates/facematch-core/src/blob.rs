//! Key-value blob backends for the embedding store.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blob backend unavailable: {0}")]
    Unavailable(String),
}

/// A store of whole serialized blobs under string keys.
pub trait BlobStore: Send {
    fn load(&self, key: &str) -> Result<Option<String>, BlobError>;
    fn save(&mut self, key: &str, value: &str) -> Result<(), BlobError>;
}

/// Process-local blob store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, key: &str) -> Result<Option<String>, BlobError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| BlobError::Unavailable("memory store lock poisoned".into()))?;
        Ok(blobs.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), BlobError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| BlobError::Unavailable("memory store lock poisoned".into()))?;
        blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// SQLite-backed blob store: one `blobs(key, value)` table.
pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlobError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BlobError::Unavailable(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite blob store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, BlobError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, BlobError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )?;
        Ok(Self { conn })
    }
}

impl BlobStore for SqliteBlobStore {
    fn load(&self, key: &str) -> Result<Option<String>, BlobError> {
        let value = self
            .conn
            .query_row("SELECT value FROM blobs WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), BlobError> {
        self.conn.execute(
            "INSERT INTO blobs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
