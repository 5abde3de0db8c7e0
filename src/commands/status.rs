use clap::Args;
use serde::Serialize;

use super::{OutputFormat, Session};
use fieldsync::Config;

/// Show queue and connectivity status
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct Status {
    api_url: Option<String>,
    online: bool,
    pending_operations: u64,
    dead_letters: usize,
    last_sync_time: Option<String>,
}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open(config).await?;
        let status = Status {
            api_url: session.dispatcher.as_ref().map(|d| d.base_url().to_string()),
            online: session.reachable,
            pending_operations: session.service.pending_operations_count().await?,
            dead_letters: session.service.dead_letters().await?.len(),
            last_sync_time: session.service.last_sync_time().map(|t| t.to_rfc3339()),
        };
        session.close().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Text => {
                println!("Offline Queue Status");
                println!("====================\n");
                match &status.api_url {
                    Some(url) => println!(
                        "API:          {} ({})",
                        url,
                        if status.online { "reachable" } else { "unreachable" }
                    ),
                    None => println!("API:          not configured"),
                }
                println!("Pending:      {}", status.pending_operations);
                println!("Dead letters: {}", status.dead_letters);
                println!(
                    "Last sync:    {}",
                    status.last_sync_time.as_deref().unwrap_or("never")
                );
            }
        }
        Ok(())
    }
}
