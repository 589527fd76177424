//! Stockrelay daemon - durable outbound queue for inventory movements.

mod app;
mod ipc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stockrelay_config::{init_logging, Config, Paths};

/// Stockrelay daemon command-line interface.
#[derive(Parser)]
#[command(name = "stockrelay-daemon")]
#[command(about = "Daemon that relays inventory movements to the commerce platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the configured level.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (socket, database, config). Defaults to ~/.stockrelay
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    // Initialize logging (CLI flag wins over the configured level)
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(log_level);

    match cli.command {
        Some(Commands::Start { foreground }) => {
            app::run_daemon(config, paths, foreground).await?;
        }
        None => {
            // Default to start in foreground if no command given
            app::run_daemon(config, paths, true).await?;
        }
        Some(Commands::Stop) => {
            app::stop_daemon(&paths).await?;
        }
        Some(Commands::Status) => {
            app::check_status(&paths).await?;
        }
    }

    Ok(())
}
