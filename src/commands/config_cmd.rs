use clap::{Args, Subcommand};

use super::OutputFormat;
use fieldsync::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!(
                            "api.base_url: {}",
                            config.api.base_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "api.api_key: {}",
                            if config.api.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!("api.request_timeout_secs: {}", config.api.request_timeout_secs);
                        println!();

                        let sync = &config.sync;
                        println!("sync.max_retries: {}", sync.max_retries);
                        println!("sync.backoff_secs: {:?}", sync.backoff_secs);
                        println!("sync.tick_interval_secs: {}", sync.tick_interval_secs);
                        println!("sync.sync_interval_secs: {}", sync.sync_interval_secs);
                        println!("sync.poll_interval_secs: {}", sync.poll_interval_secs);
                        println!("sync.auto_sync: {}", sync.auto_sync);
                    }
                }
                Ok(())
            }
        }
    }
}
