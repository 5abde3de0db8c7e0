use clap::{Args, Subcommand};

use super::Session;
use fieldsync::Config;

/// Inspect or edit the offline read cache
#[derive(Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand)]
pub enum CacheSubcommand {
    /// Print a cached value
    Get {
        key: String,
    },
    /// Store a value, replacing any previous one
    Set {
        key: String,
        value: String,
    },
    /// Remove every cached value
    Clear,
}

impl CacheCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let session = Session::open(config).await?;

        match &self.command {
            CacheSubcommand::Get { key } => match session.service.get_cache(key).await? {
                Some(entry) => {
                    println!("{}", String::from_utf8_lossy(&entry.data));
                    eprintln!("(stored {})", entry.stored_at.to_rfc3339());
                }
                None => eprintln!("No cached value for '{}'", key),
            },
            CacheSubcommand::Set { key, value } => {
                session.service.set_cache(key, value.as_bytes()).await?;
                println!("Cached '{}'", key);
            }
            CacheSubcommand::Clear => {
                session.service.clear_cache().await?;
                println!("Cache cleared.");
            }
        }

        session.close().await;
        Ok(())
    }
}
