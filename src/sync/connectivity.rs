//! Reachability of the remote endpoint.
//!
//! A [`ConnectivityObserver`] publishes a boolean "online" signal. Hosts with
//! native network events drive a [`ManualConnectivity`]; everything else can
//! use [`PollingConnectivity`], which probes the API's health URL.
//!
//! [`ConnectivityMonitor`] watches an observer and reacts to transitions:
//! going online starts a sync, going offline asks the host to flush volatile
//! state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::events::SyncEvent;
use super::executor::SyncExecutor;

/// Source of the online/offline signal.
pub trait ConnectivityObserver: Send + Sync {
    /// Subscribes to reachability changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<bool>;

    fn is_online(&self) -> bool {
        *self.subscribe().borrow()
    }
}

/// Connectivity pushed by the host from platform events.
#[derive(Debug)]
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Returns true if `GET {health_url}` answers with any 2xx status.
pub async fn probe(client: &reqwest::Client, health_url: &str) -> bool {
    match client.get(health_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("Health probe to {} failed: {}", health_url, e);
            false
        }
    }
}

/// Fallback observer that polls a health URL on a fixed interval.
pub struct PollingConnectivity {
    state: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl PollingConnectivity {
    /// Starts polling immediately. Reports offline until the first probe answers.
    pub fn spawn(client: reqwest::Client, health_url: impl Into<String>, interval: Duration) -> Self {
        let health_url = health_url.into();
        let (tx, state) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe(&client, &health_url).await;
                tx.send_if_modified(|current| {
                    if *current == online {
                        false
                    } else {
                        *current = online;
                        true
                    }
                });
            }
        });

        Self { state, task }
    }

    /// Health URL for an API base URL.
    pub fn health_url(base_url: &str) -> String {
        format!("{}/health", base_url.trim_end_matches('/'))
    }
}

impl ConnectivityObserver for PollingConnectivity {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }
}

impl Drop for PollingConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reacts to connectivity transitions.
pub struct ConnectivityMonitor {
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Starts watching `observer`. If it already reports online, a sync is
    /// started right away so operations left from a previous run drain.
    pub fn spawn(observer: &dyn ConnectivityObserver, executor: Arc<SyncExecutor>) -> Self {
        let mut online = observer.subscribe();

        let task = tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            if was_online {
                spawn_sync(&executor);
            }

            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online == was_online {
                    continue;
                }
                was_online = is_online;

                if is_online {
                    info!("Connectivity restored, starting sync");
                    executor.publish(SyncEvent::Online);
                    spawn_sync(&executor);
                } else {
                    info!("Connectivity lost, queuing operations locally");
                    executor.publish(SyncEvent::Offline);
                    executor.publish(SyncEvent::FlushRequested);
                }
            }
            debug!("Connectivity observer closed, monitor exiting");
        });

        Self { task }
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

fn spawn_sync(executor: &Arc<SyncExecutor>) {
    let executor = Arc::clone(executor);
    tokio::spawn(async move {
        executor.sync().await;
    });
}
