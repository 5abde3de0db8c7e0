use clap::Args;

use super::{print_report, Session};
use fieldsync::{Config, OperationKind};

#[derive(Args)]
pub struct QueueCommand {
    /// Operation kind: create, update or delete
    kind: OperationKind,

    /// Resource collection name (e.g., "projects")
    entity: String,

    /// JSON payload; update and delete need an "id" field
    payload: String,

    /// Only persist, do not attempt delivery
    #[arg(long)]
    no_sync: bool,
}

impl QueueCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| format!("Invalid JSON payload: {}", e))?;

        let session = Session::open(config).await?;
        let id = session
            .service
            .queue_operation(self.kind, self.entity.as_str(), payload)
            .await?;
        println!("Queued {} {} ({})", self.kind, self.entity, id);

        if !self.no_sync && config.sync.auto_sync {
            if session.reachable {
                if let Some(report) = session.sync().await {
                    print_report(&report);
                }
            } else {
                println!(
                    "API unreachable, {} operation(s) pending",
                    session.service.pending_operations_count().await?
                );
            }
        }

        session.close().await;
        Ok(())
    }
}
