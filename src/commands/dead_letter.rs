use clap::{Args, Subcommand};

use super::{OutputFormat, Session};
use fieldsync::Config;

/// Operations dropped after exhausting their retries
#[derive(Args)]
pub struct DeadLetterCommand {
    #[command(subcommand)]
    pub command: Option<DeadLetterSubcommand>,
}

#[derive(Subcommand)]
pub enum DeadLetterSubcommand {
    /// List dropped operations (default)
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Discard all dropped operations
    Clear,
}

impl DeadLetterCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open(config).await?;

        match &self.command {
            None => list(&session, &OutputFormat::Text).await?,
            Some(DeadLetterSubcommand::List { format }) => list(&session, format).await?,
            Some(DeadLetterSubcommand::Clear) => {
                session.service.clear_dead_letters().await?;
                println!("Dead letters cleared.");
            }
        }

        session.close().await;
        Ok(())
    }
}

async fn list(session: &Session, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let letters = session.service.dead_letters().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&letters)?),
        OutputFormat::Text => {
            if letters.is_empty() {
                println!("No dead letters.");
                return Ok(());
            }
            for letter in &letters {
                println!("{}", letter);
                println!("  payload: {}", letter.operation.payload);
            }
        }
    }
    Ok(())
}
