//! Delivery commands.

use crate::app::App;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Process one batch.
pub async fn process(app: &App, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let summary = admin.process().await?;

    match format {
        OutputFormat::Text => {
            output::print_heading("Outbox run");
            output::print_row("Processed", &summary.processed.to_string());
            output::print_row("Succeeded", &summary.succeeded.to_string());
            output::print_row("Rescheduled", &summary.failed.to_string());
            output::print_row("Dead-lettered", &summary.dead_lettered.to_string());
            if summary.superseded > 0 {
                output::print_row("Superseded", &summary.superseded.to_string());
            }
        }
        OutputFormat::Json => output::print_json(&summary)?,
    }
    Ok(())
}

/// Process batches every `interval_secs` until Ctrl-C.
pub async fn watch(app: &App, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        anyhow::bail!("--interval-secs must be at least 1");
    }
    let worker = app.open_worker().await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                // Dropping the sender would stop the worker; keep it alive.
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    worker
        .run_periodic(Duration::from_secs(interval_secs), shutdown_rx)
        .await;
    Ok(())
}
