//! Recurring tick that replays operations whose backoff has elapsed.
//!
//! Due times live on the operations themselves, so nothing is lost if the
//! process restarts mid-delay: the first tick after startup picks them up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::executor::SyncExecutor;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

pub struct RetryScheduler {
    task: JoinHandle<()>,
}

impl RetryScheduler {
    pub fn spawn(
        executor: Arc<SyncExecutor>,
        online: watch::Receiver<bool>,
        tick_interval: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !*online.borrow() || executor.is_running() {
                    continue;
                }
                match executor.has_due_operations().await {
                    Ok(true) => {
                        debug!("Retry tick: operations due, syncing");
                        executor.sync().await;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Retry tick could not read pending operations: {}", e),
                }
            }
        });

        Self { task }
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
