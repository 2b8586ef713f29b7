//! Retention and recovery commands.

use crate::app::App;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use std::time::Duration;

/// Seconds a claim may age before `sweep` requeues it, when neither the
/// flag nor the config sets one.
const DEFAULT_STALE_SECS: u64 = 300;

/// Delete old COMPLETED events.
pub async fn cleanup(app: &App, retention_days: Option<u32>, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let days = retention_days.unwrap_or(app.config.retention_days);
    let result = admin.cleanup(Some(days)).await?;

    match format {
        OutputFormat::Text => output::print_success(
            &format!(
                "Deleted {} completed event(s) older than {} days",
                result.deleted_count, days
            ),
            format,
        ),
        OutputFormat::Json => output::print_json(&result)?,
    }
    Ok(())
}

/// Delete old DEAD_LETTER events.
pub async fn purge_dead_letters(app: &App, retention_days: u32, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let result = admin.purge_dead_letters(retention_days).await?;

    match format {
        OutputFormat::Text => output::print_success(
            &format!(
                "Deleted {} dead-lettered event(s) older than {} days",
                result.deleted_count, retention_days
            ),
            format,
        ),
        OutputFormat::Json => output::print_json(&result)?,
    }
    Ok(())
}

/// Take back stale PROCESSING events.
pub async fn sweep(app: &App, stale_secs: Option<u64>, format: &OutputFormat) -> Result<()> {
    let secs = stale_secs
        .or(app.config.worker.stale_after_secs)
        .unwrap_or(DEFAULT_STALE_SECS);

    let admin = app.open_admin().await?;
    let result = admin.sweep_stale(Duration::from_secs(secs)).await?;

    match format {
        OutputFormat::Text => {
            output::print_success(
                &format!("Requeued {} stale event(s)", result.requeued_count),
                format,
            );
            for id in &result.event_ids {
                println!("  {}", id);
            }
            if result.dead_lettered_count > 0 {
                output::print_success(
                    &format!(
                        "Dead-lettered {} event(s) out of attempts",
                        result.dead_lettered_count
                    ),
                    format,
                );
                for id in &result.dead_lettered_ids {
                    println!("  {}", id);
                }
            }
        }
        OutputFormat::Json => output::print_json(&result)?,
    }
    Ok(())
}
