use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    CacheCommand, ConfigCommand, DeadLetterCommand, QueueCommand, RunCommand, StatusCommand,
    SyncCommand,
};
use fieldsync::Config;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version)]
#[command(about = "Offline operation queue for REST API clients", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a create, update or delete for delivery
    Queue(QueueCommand),

    /// Deliver pending operations now
    Sync(SyncCommand),

    /// Show pending count, last sync time and reachability
    Status(StatusCommand),

    /// Discard all pending operations
    Clear,

    /// Manage the offline read cache
    Cache(CacheCommand),

    /// Inspect operations dropped after exhausting retries
    DeadLetters(DeadLetterCommand),

    /// Run in the foreground, syncing whenever the API is reachable
    Run(RunCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Queue(cmd)) => cmd.run(&config).await?,
        Some(Commands::Sync(cmd)) => cmd.run(&config).await?,
        Some(Commands::Status(cmd)) => cmd.run(&config).await?,
        Some(Commands::Clear) => {
            let session = commands::Session::open(&config).await?;
            let pending = session.service.pending_operations_count().await?;
            session.service.clear_pending_operations().await?;
            session.close().await;
            println!("Discarded {} pending operation(s).", pending);
        }
        Some(Commands::Cache(cmd)) => cmd.run(&config).await?,
        Some(Commands::DeadLetters(cmd)) => cmd.run(&config).await?,
        Some(Commands::Run(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
