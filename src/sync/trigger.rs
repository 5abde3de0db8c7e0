//! Deferred wake-ups from the host environment.
//!
//! At startup the service hands a [`SyncHandle`] to every registered
//! [`DeferredTrigger`]. The trigger decides when to call it; nothing is
//! assumed about frequency or reliability.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::SyncReport;
use super::executor::SyncExecutor;

/// Cheap, cloneable capability to start a sync cycle.
#[derive(Clone)]
pub struct SyncHandle {
    executor: Arc<SyncExecutor>,
}

impl SyncHandle {
    pub fn new(executor: Arc<SyncExecutor>) -> Self {
        Self { executor }
    }

    /// Starts a sync in the background.
    pub fn fire(&self) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            executor.sync().await;
        });
    }

    /// Runs a sync and waits for it. `None` if one was already running.
    pub async fn run(&self) -> Option<SyncReport> {
        self.executor.sync().await
    }
}

/// A platform facility that can wake the sync machinery.
pub trait DeferredTrigger: Send + Sync {
    fn register(&self, handle: SyncHandle);

    fn unregister(&self);
}

/// Fires on a fixed period, starting one period after registration.
pub struct IntervalTrigger {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
        }
    }
}

impl DeferredTrigger for IntervalTrigger {
    fn register(&self, handle: SyncHandle) {
        let period = self.period;
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("Interval trigger fired");
                handle.run().await;
            }
        });

        if let Ok(mut slot) = self.task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    fn unregister(&self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.unregister();
    }
}
