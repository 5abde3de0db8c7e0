//! Offline replay of queued mutations.
//!
//! # Flow
//!
//! 1. [`OperationQueue`] persists a mutation and, when online, starts a sync.
//! 2. [`SyncExecutor`] drains pending operations in `enqueued_at` order,
//!    dispatching each through a [`Dispatcher`].
//! 3. Failures are retried per [`RetryPolicy`]; due times are persisted and
//!    picked up by the [`RetryScheduler`] tick.
//! 4. [`ConnectivityMonitor`] and any [`DeferredTrigger`] are alternate ways
//!    into the executor.

pub mod connectivity;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod trigger;

pub use connectivity::{
    probe, ConnectivityMonitor, ConnectivityObserver, ManualConnectivity, PollingConnectivity,
};
pub use dispatcher::{DispatchError, Dispatcher, HttpDispatcher, HttpDispatcherError};
pub use events::{SyncEvent, SyncReport};
pub use executor::{SyncExecutor, LAST_SYNC_TIME_KEY};
pub use queue::{OperationQueue, LAST_ENQUEUED_AT_KEY};
pub use retry::RetryPolicy;
pub use scheduler::RetryScheduler;
pub use trigger::{DeferredTrigger, IntervalTrigger, SyncHandle};
