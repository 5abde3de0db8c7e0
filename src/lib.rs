//! Fieldsync
//!
//! Offline operation queue for clients of a REST API. Mutations made while
//! the network is unreachable are persisted locally and replayed in order
//! once connectivity returns, with bounded retries and backoff.

pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod service;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ApiConfig, Config, ConfigError, SyncSettings};
pub use db::{MemoryStore, SqliteStore, Store, StoreError};
pub use models::{CacheEntry, DeadLetter, Operation, OperationKind};
pub use service::{OfflineSync, OfflineSyncBuilder};
pub use sync::{
    ConnectivityObserver, DeferredTrigger, DispatchError, Dispatcher, HttpDispatcher,
    IntervalTrigger, ManualConnectivity, PollingConnectivity, RetryPolicy, SyncEvent, SyncHandle,
    SyncReport,
};
