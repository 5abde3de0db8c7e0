//! The reconciliation loop.
//!
//! A sync cycle loads every pending operation, sorts by `enqueued_at` and
//! dispatches them one at a time. Success removes the operation; failure bumps
//! `retry_count`, records `last_error` and persists the next due time from the
//! [`RetryPolicy`]. Once the policy is exhausted the operation is moved to the
//! dead-letter collection.
//!
//! Only one cycle runs at a time. A call to [`SyncExecutor::sync`] while a
//! cycle is in flight returns `None` immediately.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchError, Dispatcher};
use super::events::{SyncEvent, SyncReport, EVENT_CHANNEL_CAPACITY};
use super::retry::RetryPolicy;
use crate::clock::Clock;
use crate::db::{Store, StoreError};
use crate::models::{DeadLetter, Operation};

/// Metadata key holding the RFC 3339 time of the last completed cycle.
pub const LAST_SYNC_TIME_KEY: &str = "lastSyncTime";

enum Resolution {
    Retrying,
    Dropped,
}

pub struct SyncExecutor {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (last_sync, _) = watch::channel(None);
        Self {
            store,
            dispatcher,
            policy,
            clock,
            in_flight: Mutex::new(()),
            events,
            last_sync,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.borrow()
    }

    pub fn watch_last_sync_time(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_sync.subscribe()
    }

    /// Loads the persisted last sync time into the observable.
    pub async fn restore_last_sync_time(&self) -> Result<(), StoreError> {
        let stored = self.store.get_metadata(LAST_SYNC_TIME_KEY).await?;
        let parsed = stored.and_then(|value| match DateTime::parse_from_rfc3339(&value) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unparseable {} '{}': {}", LAST_SYNC_TIME_KEY, value, e);
                None
            }
        });
        self.last_sync.send_replace(parsed);
        Ok(())
    }

    /// True while a cycle holds the single-flight guard.
    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// True if some pending operation may be dispatched now.
    pub async fn has_due_operations(&self) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_operations()
            .await?
            .iter()
            .any(|op| op.is_due(now)))
    }

    /// Runs one sync cycle, or returns `None` if a cycle is already running.
    ///
    /// Dispatch failures never escape; they are resolved per operation.
    pub async fn sync(&self) -> Option<SyncReport> {
        // The guard is released on every exit path, including unwinding.
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync already in progress, skipping");
                return None;
            }
        };

        Some(self.run_cycle().await)
    }

    async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let mut operations = match self.store.list_operations().await {
            Ok(ops) => ops,
            Err(e) => {
                error!("Sync aborted, failed to load pending operations: {}", e);
                return report;
            }
        };
        operations.sort_by_key(|op| op.enqueued_at);

        if !operations.is_empty() {
            info!("Syncing {} pending operation(s)", operations.len());
        }

        for op in operations {
            if !op.is_due(self.clock.now()) {
                report.skipped += 1;
                continue;
            }

            match self.dispatcher.dispatch(&op).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove_operation(op.id).await {
                        // Stays queued; the next cycle re-sends it (at-least-once).
                        warn!("Dispatched {} but failed to remove it: {}", op, e);
                    }
                    debug!("Dispatched {}", op);
                    report.dispatched += 1;
                    self.publish(SyncEvent::Dispatched { id: op.id });
                }
                Err(e) => match self.resolve_failure(op, e).await {
                    Resolution::Retrying => report.failed += 1,
                    Resolution::Dropped => report.dropped += 1,
                },
            }
        }

        let finished_at = self.clock.now();
        if let Err(e) = self
            .store
            .set_metadata(LAST_SYNC_TIME_KEY, &finished_at.to_rfc3339())
            .await
        {
            warn!("Failed to record {}: {}", LAST_SYNC_TIME_KEY, e);
        }
        self.last_sync.send_replace(Some(finished_at));

        self.publish(SyncEvent::CycleCompleted {
            report,
            at: finished_at,
        });
        report
    }

    async fn resolve_failure(&self, mut op: Operation, err: DispatchError) -> Resolution {
        let now = self.clock.now();
        op.retry_count = op.retry_count.saturating_add(1);
        op.last_error = Some(err.to_string());

        if self.policy.is_exhausted(op.retry_count) {
            op.next_attempt_at = None;

            if let Err(e) = self.store.update_operation(&op).await {
                warn!("Failed to persist final error for {}: {}", op, e);
            }
            if let Err(e) = self
                .store
                .add_dead_letter(&DeadLetter::new(op.clone(), now))
                .await
            {
                warn!("Failed to dead-letter {}: {}", op, e);
            }
            if let Err(e) = self.store.remove_operation(op.id).await {
                warn!("Failed to remove dropped {}: {}", op, e);
            }

            error!(
                "Dropping {} after {} failed attempts: {}",
                op, op.retry_count, err
            );
            self.publish(SyncEvent::Dropped { operation: op });
            return Resolution::Dropped;
        }

        let delay = self.policy.delay_for(op.retry_count);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        op.next_attempt_at = Some(next_attempt_at);

        if let Err(e) = self.store.update_operation(&op).await {
            warn!("Failed to persist retry state for {}: {}", op, e);
        }

        warn!(
            "Dispatch of {} failed (attempt {}/{}), retrying in {:?}: {}",
            op, op.retry_count, self.policy.max_retries, delay, err
        );
        self.publish(SyncEvent::Failed {
            id: op.id,
            retry_count: op.retry_count,
            error: err.to_string(),
            next_attempt_at,
        });
        Resolution::Retrying
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::models::OperationKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Replies from a script, then succeeds. Records every dispatched id.
    #[derive(Default)]
    struct ScriptedDispatcher {
        replies: StdMutex<VecDeque<Result<(), DispatchError>>>,
        calls: StdMutex<Vec<Operation>>,
    }

    impl ScriptedDispatcher {
        fn failing(times: usize) -> Self {
            let d = Self::default();
            for _ in 0..times {
                d.replies
                    .lock()
                    .unwrap()
                    .push_back(Err(DispatchError::Transport("connection refused".into())));
            }
            d
        }

        fn calls(&self) -> Vec<Operation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for ScriptedDispatcher {
        async fn dispatch(&self, op: &Operation) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push(op.clone());
            self.replies.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: Arc<ScriptedDispatcher>,
        clock: Arc<ManualClock>,
        executor: SyncExecutor,
    }

    fn harness(dispatcher: ScriptedDispatcher, policy: RetryPolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(dispatcher);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let executor = SyncExecutor::new(
            store.clone(),
            dispatcher.clone(),
            policy,
            clock.clone(),
        );
        Harness {
            store,
            dispatcher,
            clock,
            executor,
        }
    }

    async fn enqueue(h: &Harness, offset_micros: i64, entity: &str) -> Operation {
        let at = h.clock.now() + chrono::Duration::microseconds(offset_micros);
        let op = Operation::new(OperationKind::Create, entity, json!({"n": offset_micros}), at);
        h.store.add_operation(&op).await.unwrap();
        op
    }

    #[tokio::test]
    async fn test_dispatches_in_enqueue_order() {
        let h = harness(ScriptedDispatcher::default(), RetryPolicy::default());
        // Inserted out of order on purpose.
        let third = enqueue(&h, 30, "receipts").await;
        let first = enqueue(&h, 10, "projects").await;
        let second = enqueue(&h, 20, "projects").await;

        let report = h.executor.sync().await.unwrap();
        assert_eq!(report.dispatched, 3);

        let ids: Vec<_> = h.dispatcher.calls().iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert_eq!(h.store.count_operations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_cycle() {
        let h = harness(ScriptedDispatcher::failing(1), RetryPolicy::default());
        let failing = enqueue(&h, 10, "projects").await;
        let ok = enqueue(&h, 20, "projects").await;

        let report = h.executor.sync().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.dispatched, 1);

        let remaining = h.store.list_operations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, failing.id);
        assert_eq!(remaining[0].retry_count, 1);
        assert_eq!(remaining[0].last_error.as_deref(), Some("connection refused"));
        assert_ne!(remaining[0].id, ok.id);
    }

    #[tokio::test]
    async fn test_backoff_is_persisted_and_respected() {
        let h = harness(ScriptedDispatcher::failing(1), RetryPolicy::default());
        enqueue(&h, 0, "projects").await;
        let start = h.clock.now();

        h.executor.sync().await.unwrap();
        let op = h.store.list_operations().await.unwrap().remove(0);
        assert_eq!(op.next_attempt_at, Some(start + chrono::Duration::seconds(1)));

        // Not due yet.
        let report = h.executor.sync().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(h.dispatcher.calls().len(), 1);

        h.clock.advance(Duration::from_secs(1));
        let report = h.executor.sync().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(h.dispatcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let h = harness(ScriptedDispatcher::failing(10), RetryPolicy::immediate(3));
        let op = enqueue(&h, 0, "projects").await;

        for _ in 0..3 {
            h.executor.sync().await.unwrap();
        }
        // A fourth cycle finds nothing to do.
        let report = h.executor.sync().await.unwrap();
        assert_eq!(report.attempted(), 0);

        assert_eq!(h.dispatcher.calls().len(), 3);
        assert_eq!(h.store.count_operations().await.unwrap(), 0);

        let letters = h.store.list_dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].operation.id, op.id);
        assert_eq!(letters[0].operation.retry_count, 3);
        assert_eq!(
            letters[0].operation.last_error.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_cycle_records_last_sync_time() {
        let h = harness(ScriptedDispatcher::default(), RetryPolicy::default());
        assert!(h.executor.last_sync_time().is_none());

        h.executor.sync().await.unwrap();
        let now = h.clock.now();

        assert_eq!(h.executor.last_sync_time(), Some(now));
        assert_eq!(
            h.store.get_metadata(LAST_SYNC_TIME_KEY).await.unwrap(),
            Some(now.to_rfc3339())
        );
    }

    #[tokio::test]
    async fn test_restore_last_sync_time() {
        let h = harness(ScriptedDispatcher::default(), RetryPolicy::default());
        let at = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        h.store
            .set_metadata(LAST_SYNC_TIME_KEY, &at.to_rfc3339())
            .await
            .unwrap();

        h.executor.restore_last_sync_time().await.unwrap();
        assert_eq!(h.executor.last_sync_time(), Some(at));
    }

    #[tokio::test]
    async fn test_sync_returns_none_while_running() {
        let h = harness(ScriptedDispatcher::default(), RetryPolicy::default());
        let _held = h.executor.in_flight.try_lock().unwrap();

        assert!(h.executor.is_running());
        assert!(h.executor.sync().await.is_none());
    }

    #[tokio::test]
    async fn test_events_published() {
        let h = harness(ScriptedDispatcher::failing(1), RetryPolicy::default());
        let mut events = h.executor.subscribe();
        let failing = enqueue(&h, 0, "projects").await;
        let ok = enqueue(&h, 1, "projects").await;

        h.executor.sync().await.unwrap();

        match events.recv().await.unwrap() {
            SyncEvent::Failed {
                id, retry_count, ..
            } => {
                assert_eq!(id, failing.id);
                assert_eq!(retry_count, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Dispatched { id: ok.id });
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::CycleCompleted { .. }
        ));
    }
}
