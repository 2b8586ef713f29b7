//! outboxctl - run and operate the hotel integration outbox.

mod app;
mod commands;
mod output;

use std::path::PathBuf;

use app::App;
use clap::{Parser, Subcommand};
use outbox_config_and_utils::{init_logging, OutboxConfig, Paths};
use outbox_database::{EventStatus, DEFAULT_DESTINATION};

/// Integration outbox operator tool.
#[derive(Parser)]
#[command(name = "outboxctl")]
#[command(about = "Deliver and manage integration outbox events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database, and logs. Defaults to ~/.hotel-outbox
    #[arg(long, global = true, env = "OUTBOX_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Config file to use instead of <base-dir>/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one batch of due events
    Process,

    /// Process batches on an interval until interrupted
    Watch {
        /// Seconds between batches
        #[arg(long, default_value = "30")]
        interval_secs: u64,
    },

    /// Show event counts by status
    Stats,

    /// List events, most recent first
    List {
        /// Only events in this status (pending, processing, completed, failed, dead_letter)
        #[arg(short, long)]
        status: Option<EventStatus>,
        /// Page size (1-100)
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Events to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one event with its error history
    Get {
        /// Event ID
        id: String,
    },

    /// Move a FAILED or DEAD_LETTER event back to PENDING
    Retry {
        /// Event ID
        id: String,
    },

    /// Move every DEAD_LETTER event back to PENDING
    RetryAll,

    /// Delete COMPLETED events older than the retention window
    Cleanup {
        /// Retention in days (1-365). Defaults to the configured retention.
        #[arg(long)]
        retention_days: Option<u32>,
    },

    /// Delete DEAD_LETTER events older than the retention window
    PurgeDeadLetters {
        /// Retention in days (1-365)
        #[arg(long)]
        retention_days: u32,
    },

    /// Requeue PROCESSING events whose claim has gone stale
    Sweep {
        /// Claim age in seconds. Defaults to the configured threshold.
        #[arg(long)]
        stale_secs: Option<u64>,
    },

    /// Append a PENDING event
    Append {
        /// Event type, e.g. reservation.updated
        event_type: String,
        /// Payload, stored as given
        payload: String,
        /// Downstream system that receives the event, e.g. TELEGRAM
        #[arg(long, default_value = DEFAULT_DESTINATION)]
        destination: String,
        /// Attempt budget. Defaults to the configured max_retries.
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

fn load_config(cli: &Cli, paths: &Paths) -> anyhow::Result<OutboxConfig> {
    let config = match &cli.config {
        Some(path) => OutboxConfig::load_explicit(path)?,
        None => OutboxConfig::load(paths)?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let config = load_config(&cli, &paths)?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    let long_running = matches!(cli.command, Commands::Watch { .. });
    init_logging(&level, &paths, long_running)?;

    let app = App::new(config, paths);
    let format = &cli.format;

    match cli.command {
        Commands::Process => commands::process(&app, format).await,
        Commands::Watch { interval_secs } => commands::watch(&app, interval_secs).await,
        Commands::Stats => commands::stats(&app, format).await,
        Commands::List {
            status,
            limit,
            offset,
        } => commands::list(&app, status, limit, offset, format).await,
        Commands::Get { id } => commands::get(&app, &id, format).await,
        Commands::Retry { id } => commands::retry(&app, &id, format).await,
        Commands::RetryAll => commands::retry_all(&app, format).await,
        Commands::Cleanup { retention_days } => {
            commands::cleanup(&app, retention_days, format).await
        }
        Commands::PurgeDeadLetters { retention_days } => {
            commands::purge_dead_letters(&app, retention_days, format).await
        }
        Commands::Sweep { stale_secs } => commands::sweep(&app, stale_secs, format).await,
        Commands::Append {
            event_type,
            payload,
            destination,
            max_retries,
        } => {
            commands::append(&app, &event_type, &destination, &payload, max_retries, format).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
}
