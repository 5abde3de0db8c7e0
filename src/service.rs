//! The offline sync service object.
//!
//! Construct once at startup with [`OfflineSyncBuilder`], share by reference,
//! and call [`OfflineSync::shutdown`] on exit. If the durable store cannot be
//! opened, [`OfflineSyncBuilder::init`] logs the failure and returns an inert
//! service: reads report nothing pending and writes fail with
//! [`StoreError::Unavailable`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{MemoryStore, SqliteStore, Store, StoreError};
use crate::models::{CacheEntry, DeadLetter, OperationKind};
use crate::sync::scheduler::DEFAULT_TICK_INTERVAL;
use crate::sync::{
    ConnectivityMonitor, ConnectivityObserver, DeferredTrigger, Dispatcher, OperationQueue,
    RetryPolicy, RetryScheduler, SyncEvent, SyncExecutor, SyncHandle, SyncReport,
};

enum StoreSource {
    Sqlite(PathBuf),
    Provided(Arc<dyn Store>),
}

/// Collects the collaborators of an [`OfflineSync`] before starting it.
pub struct OfflineSyncBuilder {
    store: StoreSource,
    dispatcher: Arc<dyn Dispatcher>,
    connectivity: Arc<dyn ConnectivityObserver>,
    policy: RetryPolicy,
    tick_interval: Duration,
    triggers: Vec<Arc<dyn DeferredTrigger>>,
    clock: Arc<dyn Clock>,
}

impl OfflineSyncBuilder {
    /// Starts from defaults: in-memory store, default retry policy, system clock.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Self {
        Self {
            store: StoreSource::Provided(Arc::new(MemoryStore::new())),
            dispatcher,
            connectivity,
            policy: RetryPolicy::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            triggers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// SQLite store at the configured path, retry policy and tick from `config.sync`.
    pub fn from_config(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Self {
        Self::new(dispatcher, connectivity)
            .with_sqlite(config.database_path.value.clone())
            .with_retry_policy(config.sync.retry_policy())
            .with_tick_interval(config.sync.tick_interval())
    }

    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreSource::Sqlite(path.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = StoreSource::Provided(store);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn DeferredTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens the store and starts background tasks, returning any store error.
    pub async fn try_init(self) -> Result<OfflineSync, StoreError> {
        let store: Arc<dyn Store> = match self.store {
            StoreSource::Sqlite(path) => Arc::new(SqliteStore::open(path).await?),
            StoreSource::Provided(store) => store,
        };

        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&store),
            self.dispatcher,
            self.policy,
            Arc::clone(&self.clock),
        ));
        executor.restore_last_sync_time().await?;

        let online = self.connectivity.subscribe();
        let queue = OperationQueue::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            online.clone(),
            Arc::clone(&self.clock),
        )
        .await?;

        let monitor = ConnectivityMonitor::spawn(self.connectivity.as_ref(), Arc::clone(&executor));
        let scheduler =
            RetryScheduler::spawn(Arc::clone(&executor), online.clone(), self.tick_interval);
        for trigger in &self.triggers {
            trigger.register(SyncHandle::new(Arc::clone(&executor)));
        }

        info!(
            "Offline sync initialized ({} pending operation(s))",
            queue.pending_count().await?
        );

        Ok(OfflineSync {
            active: Some(Active {
                store,
                executor,
                queue,
                connectivity: self.connectivity,
                online,
                clock: self.clock,
                monitor,
                scheduler,
                triggers: self.triggers,
            }),
        })
    }

    /// Like [`try_init`](Self::try_init), but a store failure yields an inert service.
    pub async fn init(self) -> OfflineSync {
        match self.try_init().await {
            Ok(service) => service,
            Err(e) => {
                error!("Offline support disabled: {}", e);
                OfflineSync::inert()
            }
        }
    }
}

struct Active {
    store: Arc<dyn Store>,
    executor: Arc<SyncExecutor>,
    queue: OperationQueue,
    /// Owned so that observers whose background task stops on drop keep running.
    connectivity: Arc<dyn ConnectivityObserver>,
    online: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
    monitor: ConnectivityMonitor,
    scheduler: RetryScheduler,
    triggers: Vec<Arc<dyn DeferredTrigger>>,
}

/// Public face of the offline layer.
pub struct OfflineSync {
    active: Option<Active>,
}

impl OfflineSync {
    pub fn builder(
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> OfflineSyncBuilder {
        OfflineSyncBuilder::new(dispatcher, connectivity)
    }

    /// Starts the service described by `config`. Never fails; see [`OfflineSyncBuilder::init`].
    pub async fn init(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
        triggers: Vec<Arc<dyn DeferredTrigger>>,
    ) -> Self {
        Self::configured(config, dispatcher, connectivity, triggers)
            .init()
            .await
    }

    pub async fn try_init(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
        triggers: Vec<Arc<dyn DeferredTrigger>>,
    ) -> Result<Self, StoreError> {
        Self::configured(config, dispatcher, connectivity, triggers)
            .try_init()
            .await
    }

    fn configured(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
        connectivity: Arc<dyn ConnectivityObserver>,
        triggers: Vec<Arc<dyn DeferredTrigger>>,
    ) -> OfflineSyncBuilder {
        triggers.into_iter().fold(
            OfflineSyncBuilder::from_config(config, dispatcher, connectivity),
            OfflineSyncBuilder::with_trigger,
        )
    }

    /// A service with no store behind it.
    pub fn inert() -> Self {
        Self { active: None }
    }

    /// False if the store failed to open at startup.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Persists a mutation for later delivery and returns its id.
    ///
    /// If online, a sync starts in the background.
    pub async fn queue_operation(
        &self,
        kind: OperationKind,
        entity: impl Into<String>,
        payload: Value,
    ) -> Result<Uuid, StoreError> {
        match &self.active {
            Some(active) => active.queue.queue_operation(kind, entity, payload).await,
            None => Err(StoreError::Unavailable),
        }
    }

    /// Runs a sync cycle to completion. `None` if one was already running.
    pub async fn sync(&self) -> Option<SyncReport> {
        match &self.active {
            Some(active) => active.executor.sync().await,
            None => None,
        }
    }

    pub async fn pending_operations_count(&self) -> Result<u64, StoreError> {
        match &self.active {
            Some(active) => active.queue.pending_count().await,
            None => Ok(0),
        }
    }

    pub async fn clear_pending_operations(&self) -> Result<(), StoreError> {
        match &self.active {
            Some(active) => active.queue.clear().await,
            None => Ok(()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| *active.online.borrow())
    }

    pub fn watch_online(&self) -> watch::Receiver<bool> {
        match &self.active {
            Some(active) => active.online.clone(),
            None => watch::channel(false).1,
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.active
            .as_ref()
            .and_then(|active| active.executor.last_sync_time())
    }

    pub fn watch_last_sync_time(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        match &self.active {
            Some(active) => active.executor.watch_last_sync_time(),
            None => watch::channel(None).1,
        }
    }

    /// Sync outcomes and connectivity transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        match &self.active {
            Some(active) => active.executor.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Handle for host wake-up facilities registered after startup.
    pub fn sync_handle(&self) -> Option<SyncHandle> {
        self.active
            .as_ref()
            .map(|active| SyncHandle::new(Arc::clone(&active.executor)))
    }

    pub async fn set_cache(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        match &self.active {
            Some(active) => {
                active
                    .store
                    .set_cache(key, data, active.clock.now())
                    .await
            }
            None => Err(StoreError::Unavailable),
        }
    }

    pub async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        match &self.active {
            Some(active) => active.store.get_cache(key).await,
            None => Ok(None),
        }
    }

    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        self.store()?.clear_cache().await
    }

    /// Operations dropped after exhausting their retries, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        match &self.active {
            Some(active) => active.store.list_dead_letters().await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn clear_dead_letters(&self) -> Result<(), StoreError> {
        self.store()?.clear_dead_letters().await
    }

    /// Stops background tasks, unregisters triggers and closes the store.
    ///
    /// A cycle that is mid-flight in a spawned task may still finish.
    pub async fn shutdown(self) {
        let Some(active) = self.active else {
            return;
        };

        for trigger in &active.triggers {
            trigger.unregister();
        }
        active.monitor.shutdown().await;
        active.scheduler.shutdown().await;
        drop(active.connectivity);
        active.store.close().await;
        info!("Offline sync shut down");
    }

    fn store(&self) -> Result<&Arc<dyn Store>, StoreError> {
        self.active
            .as_ref()
            .map(|active| &active.store)
            .ok_or(StoreError::Unavailable)
    }
}
