//! Sync CLI command: replay pending operations against the API.

use clap::Args;

use super::{print_report, Session};
use fieldsync::sync::HttpDispatcherError;
use fieldsync::Config;

/// Deliver pending operations now
#[derive(Args)]
pub struct SyncCommand {}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !config.api.is_configured() {
            return Err(HttpDispatcherError::NotConfigured.into());
        }

        let session = Session::open(config).await?;
        let pending = session.service.pending_operations_count().await?;

        if !session.reachable {
            println!("API unreachable, {} operation(s) remain queued", pending);
        } else if pending == 0 {
            println!("Nothing to sync.");
        } else {
            println!("Syncing {} pending operation(s)...", pending);
            match session.sync().await {
                Some(report) => print_report(&report),
                None => println!("A sync is already in progress."),
            }
        }

        session.close().await;
        Ok(())
    }
}
