use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CacheEntry, DeadLetter, Operation};

/// Errors raised by durable store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store at {}: {reason}", path.display())]
    Init { path: PathBuf, reason: String },

    #[error("Operation {0} is already queued")]
    DuplicateId(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Offline store is unavailable")]
    Unavailable,
}

/// Durable storage for pending operations, cached blobs, metadata and dead letters.
///
/// Every call is its own transaction; nothing spans calls. Implementations
/// must survive process restarts unless documented otherwise.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persists a new operation. Fails with [`StoreError::DuplicateId`] if the id exists.
    async fn add_operation(&self, op: &Operation) -> Result<(), StoreError>;

    /// All pending operations, in no particular order.
    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError>;

    /// Persists retry metadata of an existing operation. No-op if absent.
    async fn update_operation(&self, op: &Operation) -> Result<(), StoreError>;

    /// Idempotent delete.
    async fn remove_operation(&self, id: Uuid) -> Result<(), StoreError>;

    async fn count_operations(&self) -> Result<u64, StoreError>;

    async fn clear_operations(&self) -> Result<(), StoreError>;

    /// Largest `enqueued_at` ever persisted among pending operations.
    async fn latest_enqueued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Stores `data` under `key`, replacing any previous entry.
    async fn set_cache(
        &self,
        key: &str,
        data: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    async fn clear_cache(&self) -> Result<(), StoreError>;

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn add_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;

    /// Dead letters ordered by `dropped_at`, oldest first.
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    async fn clear_dead_letters(&self) -> Result<(), StoreError>;

    /// Releases underlying resources. Further calls may fail.
    async fn close(&self) {}
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::Corrupt {
        table,
        reason: format!("timestamp out of range: {}", micros),
    })
}
