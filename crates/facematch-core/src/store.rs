//! Append-only embedding store persisted as one JSON blob.
//!
//! Mutations update the in-memory collection first and then persist on a
//! best-effort basis: a failed write is logged and counted, never returned,
//! and memory is not rolled back. Call [`EmbeddingStore::flush`] when the
//! write must be confirmed.
//!
//! The collection is never capped. Every record is a match candidate.

use crate::blob::{BlobError, BlobStore, MemoryBlobStore};
use crate::types::FaceEmbedding;
use thiserror::Error;

/// Key under which the collection is stored.
pub const DEFAULT_STORAGE_KEY: &str = "face_embeddings";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[from] BlobError),
    #[error("malformed embeddings blob: {0}")]
    Parse(serde_json::Error),
    #[error("serializing embeddings: {0}")]
    Serialize(serde_json::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub struct EmbeddingStore {
    backend: Box<dyn BlobStore>,
    key: String,
    records: Vec<FaceEmbedding>,
    persist_failures: usize,
}

impl EmbeddingStore {
    /// Load the collection stored under `key`.
    ///
    /// A missing key is an empty store. An unreadable, malformed or
    /// inconsistent blob is logged and also yields an empty store.
    pub fn open(backend: Box<dyn BlobStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let records = match backend.load(&key) {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<FaceEmbedding>>(&blob) {
                Ok(records) => match validate_all(&records) {
                    Ok(()) => records,
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "stored embeddings are inconsistent; starting empty");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "failed to parse stored embeddings; starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "failed to load stored embeddings; starting empty");
                Vec::new()
            }
        };

        tracing::debug!(key = %key, count = records.len(), "embedding store opened");

        Self {
            backend,
            key,
            records,
            persist_failures: 0,
        }
    }

    /// Ephemeral store backed by a private [`MemoryBlobStore`].
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryBlobStore::new()), DEFAULT_STORAGE_KEY)
    }

    /// Append a record. Never replaces an existing record.
    ///
    /// Rejects empty embeddings and embeddings whose dimensionality differs
    /// from the records already stored.
    pub fn save_embedding(&mut self, record: FaceEmbedding) -> Result<(), StoreError> {
        validate(&record, self.dimension())?;
        tracing::info!(
            employee_id = %record.metadata.employee_id,
            employee_name = %record.metadata.employee_name,
            "face embedding saved"
        );
        self.records.push(record);
        self.persist();
        Ok(())
    }

    /// All records in insertion order.
    pub fn all_embeddings(&self) -> &[FaceEmbedding] {
        &self.records
    }

    pub fn embeddings_by_employee(&self, employee_id: &str) -> Vec<&FaceEmbedding> {
        self.records
            .iter()
            .filter(|r| r.metadata.employee_id == employee_id)
            .collect()
    }

    /// Remove every record for `employee_id`, returning how many were removed.
    pub fn delete_embedding(&mut self, employee_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.metadata.employee_id != employee_id);
        let removed = before - self.records.len();
        if removed > 0 {
            tracing::info!(employee_id, removed, "face embeddings deleted");
            self.persist();
        }
        removed
    }

    /// Serialize the whole collection as pretty-printed JSON.
    pub fn export_embeddings(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(&self.records).map_err(StoreError::Serialize)
    }

    /// Replace the whole collection with the records in `blob`.
    ///
    /// Malformed or inconsistent input leaves the store untouched.
    pub fn import_embeddings(&mut self, blob: &str) -> Result<usize, StoreError> {
        let records: Vec<FaceEmbedding> =
            serde_json::from_str(blob).map_err(StoreError::Parse)?;
        validate_all(&records)?;

        let count = records.len();
        self.records = records;
        tracing::info!(count, "face embeddings imported");
        self.persist();
        Ok(count)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.persist();
    }

    /// Persist now and report the outcome.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let blob = serde_json::to_string(&self.records).map_err(StoreError::Serialize)?;
        self.backend.save(&self.key, &blob)?;
        Ok(())
    }

    /// Number of best-effort writes that failed since the store was opened.
    pub fn persist_failures(&self) -> usize {
        self.persist_failures
    }

    /// Shared dimensionality of the stored embeddings, if any are stored.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(FaceEmbedding::dimension)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&mut self) {
        if let Err(e) = self.flush() {
            self.persist_failures += 1;
            tracing::error!(key = %self.key, error = %e, "failed to persist face embeddings");
        }
    }
}

/// Every record non-empty and of the first record's dimensionality.
fn validate_all(records: &[FaceEmbedding]) -> Result<(), StoreError> {
    let mut dimension = None;
    for record in records {
        validate(record, dimension)?;
        dimension = Some(record.dimension());
    }
    Ok(())
}

fn validate(record: &FaceEmbedding, dimension: Option<usize>) -> Result<(), StoreError> {
    if record.embedding.is_empty() {
        return Err(StoreError::InvalidRecord(format!(
            "empty embedding for employee {}",
            record.metadata.employee_id
        )));
    }
    if let Some(expected) = dimension {
        if record.dimension() != expected {
            return Err(StoreError::InvalidRecord(format!(
                "embedding dimension {} does not match store dimension {expected}",
                record.dimension()
            )));
        }
    }
    Ok(())
}
