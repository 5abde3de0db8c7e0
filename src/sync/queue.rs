//! Entry point for producing durable mutations.

use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::executor::SyncExecutor;
use crate::clock::Clock;
use crate::db::{Store, StoreError};
use crate::models::{Operation, OperationKind};

/// Metadata key holding the last issued `enqueued_at`, in microseconds.
pub const LAST_ENQUEUED_AT_KEY: &str = "lastEnqueuedAt";

/// Persists operations and kicks off a sync when online.
pub struct OperationQueue {
    store: Arc<dyn Store>,
    executor: Arc<SyncExecutor>,
    online: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
    /// Last issued `enqueued_at`, in microseconds.
    last_issued: AtomicI64,
}

impl OperationQueue {
    /// Creates the queue, seeding the timestamp generator from the store so
    /// ordering holds across restarts, even after the queue has drained.
    pub async fn new(
        store: Arc<dyn Store>,
        executor: Arc<SyncExecutor>,
        online: watch::Receiver<bool>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let pending = store
            .latest_enqueued_at()
            .await?
            .map(|ts| ts.timestamp_micros());
        let recorded = store
            .get_metadata(LAST_ENQUEUED_AT_KEY)
            .await?
            .and_then(|value| match value.parse::<i64>() {
                Ok(micros) => Some(micros),
                Err(e) => {
                    warn!("Ignoring unparseable {} '{}': {}", LAST_ENQUEUED_AT_KEY, value, e);
                    None
                }
            });
        let last_issued = pending.max(recorded).unwrap_or(i64::MIN);

        Ok(Self {
            store,
            executor,
            online,
            clock,
            last_issued: AtomicI64::new(last_issued),
        })
    }

    /// A timestamp strictly greater than every previously issued one.
    fn next_timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        let now = self.clock.now().timestamp_micros();
        let previous = self
            .last_issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let issued = now.max(previous.saturating_add(1));

        chrono::DateTime::from_timestamp_micros(issued).unwrap_or_else(|| self.clock.now())
    }

    /// Persists a new operation. If online, a sync is started in the
    /// background; the caller does not wait for it.
    pub async fn queue_operation(
        &self,
        kind: OperationKind,
        entity: impl Into<String>,
        payload: Value,
    ) -> Result<Uuid, StoreError> {
        let op = Operation::new(kind, entity, payload, self.next_timestamp());
        self.store.add_operation(&op).await?;
        debug!("Queued {}", op);

        let issued = op.enqueued_at.timestamp_micros().to_string();
        if let Err(e) = self.store.set_metadata(LAST_ENQUEUED_AT_KEY, &issued).await {
            // The pending operation still seeds the next restart.
            warn!("Failed to record {}: {}", LAST_ENQUEUED_AT_KEY, e);
        }

        if *self.online.borrow() {
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                executor.sync().await;
            });
        }

        Ok(op.id)
    }

    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        self.store.count_operations().await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_operations().await
    }
}
