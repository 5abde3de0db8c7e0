mod cache;
mod config_cmd;
mod dead_letter;
mod queue;
mod run;
mod status;
mod sync_cmd;

pub use cache::CacheCommand;
pub use config_cmd::ConfigCommand;
pub use dead_letter::DeadLetterCommand;
pub use queue::QueueCommand;
pub use run::RunCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

use async_trait::async_trait;
use clap::ValueEnum;
use std::sync::Arc;

use fieldsync::sync::{probe, HttpDispatcherError};
use fieldsync::{
    Config, DispatchError, Dispatcher, HttpDispatcher, ManualConnectivity, OfflineSync, Operation,
    PollingConnectivity, SyncReport,
};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Stands in when no API is configured. Never reached: the service is opened
/// offline in that case.
struct Unconfigured;

#[async_trait]
impl Dispatcher for Unconfigured {
    async fn dispatch(&self, _op: &Operation) -> Result<(), DispatchError> {
        Err(DispatchError::Transport(
            HttpDispatcherError::NotConfigured.to_string(),
        ))
    }
}

/// A service opened for a single command.
///
/// Background syncs stay off so the process can exit cleanly; commands that
/// want delivery call [`Session::sync`] explicitly when `reachable` is set.
pub(crate) struct Session {
    pub service: OfflineSync,
    pub reachable: bool,
    pub dispatcher: Option<HttpDispatcher>,
}

impl Session {
    /// Opens the store and, if an API is configured, probes it once.
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let dispatcher = if config.api.is_configured() {
            Some(HttpDispatcher::from_config(&config.api)?)
        } else {
            None
        };

        let reachable = match &dispatcher {
            Some(d) => probe(d.client(), &PollingConnectivity::health_url(d.base_url())).await,
            None => false,
        };

        let sender: Arc<dyn Dispatcher> = match &dispatcher {
            Some(d) => Arc::new(d.clone()),
            None => Arc::new(Unconfigured),
        };
        let service = OfflineSync::builder(sender, Arc::new(ManualConnectivity::new(false)))
            .with_sqlite(config.database_path.value.clone())
            .with_retry_policy(config.sync.retry_policy())
            .try_init()
            .await?;

        Ok(Self {
            service,
            reachable,
            dispatcher,
        })
    }

    pub async fn sync(&self) -> Option<SyncReport> {
        self.service.sync().await
    }

    pub async fn close(self) {
        self.service.shutdown().await;
    }
}

pub(crate) fn print_report(report: &SyncReport) {
    println!(
        "Sync complete: {} dispatched, {} failed, {} dropped, {} waiting on backoff",
        report.dispatched, report.failed, report.dropped, report.skipped
    );
}
