//! Event inspection and retry commands.

use super::format_time;
use crate::app::App;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use outbox_admin::ListQuery;
use outbox_database::{EventStatus, NewIntegrationEvent};

/// Show counts per status.
pub async fn stats(app: &App, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let stats = admin.stats().await?;

    match format {
        OutputFormat::Text => {
            output::print_heading("Outbox");
            output::print_row("Pending", &stats.pending.to_string());
            output::print_row("Processing", &stats.processing.to_string());
            output::print_row("Completed", &stats.completed.to_string());
            output::print_row("Failed", &stats.failed.to_string());
            output::print_row("Dead letter", &stats.dead_letter.to_string());
            output::print_divider();
            output::print_row("Total", &stats.total.to_string());
        }
        OutputFormat::Json => output::print_json(&stats)?,
    }
    Ok(())
}

/// List events, most recent first.
pub async fn list(
    app: &App,
    status: Option<EventStatus>,
    limit: usize,
    offset: usize,
    format: &OutputFormat,
) -> Result<()> {
    let admin = app.open_admin().await?;
    let page = admin
        .list(ListQuery {
            status,
            limit: Some(limit),
            offset: Some(offset),
        })
        .await?;

    match format {
        OutputFormat::Text => {
            if page.events.is_empty() {
                println!("No events found");
                return Ok(());
            }
            println!(
                "{:<36} {:<24} {:<18} {:<11} {:>5} {:<19} {}",
                "ID", "Type", "Destination", "Status", "Tries", "Created", "Last error"
            );
            println!("{}", "-".repeat(140));
            for event in &page.events {
                println!(
                    "{:<36} {:<24} {:<18} {:<11} {:>5} {:<19} {}",
                    event.id,
                    output::truncate(&event.event_type, 24),
                    output::truncate(&event.destination, 18),
                    event.status.as_str(),
                    format!("{}/{}", event.retry_count, event.max_retries),
                    format_time(Some(event.created_at)),
                    output::truncate(event.last_error.as_deref().unwrap_or("-"), 40),
                );
            }
            let p = &page.pagination;
            println!(
                "\nShowing {}-{} of {}{}",
                p.offset + 1,
                p.offset + page.events.len(),
                p.total,
                if p.has_more { " (more available)" } else { "" }
            );
        }
        OutputFormat::Json => output::print_json(&page)?,
    }
    Ok(())
}

/// Show one event.
pub async fn get(app: &App, id: &str, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let event = admin.get(id).await?;

    match format {
        OutputFormat::Text => {
            output::print_heading(&format!("Event {}", event.id));
            output::print_row("Type", &event.event_type);
            output::print_row("Destination", &event.destination);
            output::print_row("Status", event.status.as_str());
            output::print_row(
                "Attempts",
                &format!("{}/{}", event.retry_count, event.max_retries),
            );
            output::print_row("Next retry", &format_time(event.next_retry_at));
            output::print_row("Claimed", &format_time(event.claimed_at));
            output::print_row("Completed", &format_time(event.completed_at));
            output::print_row("Created", &format_time(Some(event.created_at)));
            output::print_row("Updated", &format_time(Some(event.updated_at)));
            output::print_row("Last error", event.last_error.as_deref().unwrap_or("-"));
            output::print_heading("Payload");
            println!("{}", event.payload);
            if !event.error_history.is_empty() {
                output::print_heading("Error history");
                for record in &event.error_history {
                    println!("  {}  {}", format_time(Some(record.at)), record.error);
                }
            }
        }
        OutputFormat::Json => output::print_json(&event)?,
    }
    Ok(())
}

/// Retry one FAILED or DEAD_LETTER event.
pub async fn retry(app: &App, id: &str, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let event = admin.retry(id).await?;

    match format {
        OutputFormat::Text => {
            output::print_success(&format!("Event {} reset to PENDING", event.id), format)
        }
        OutputFormat::Json => output::print_json(&event)?,
    }
    Ok(())
}

/// Retry every DEAD_LETTER event.
pub async fn retry_all(app: &App, format: &OutputFormat) -> Result<()> {
    let admin = app.open_admin().await?;
    let result = admin.retry_all().await?;

    match format {
        OutputFormat::Text => output::print_success(
            &format!("{} dead-lettered event(s) reset to PENDING", result.count),
            format,
        ),
        OutputFormat::Json => output::print_json(&result)?,
    }
    Ok(())
}

/// Append an event, as a producer would.
pub async fn append(
    app: &App,
    event_type: &str,
    destination: &str,
    payload: &str,
    max_retries: Option<u32>,
    format: &OutputFormat,
) -> Result<()> {
    let store = app.open_store().await?;
    let max_retries = max_retries.unwrap_or(app.config.retry.max_retries);
    let event = store
        .append(
            NewIntegrationEvent::new(event_type, payload, max_retries)
                .with_destination(destination),
        )
        .await?;

    match format {
        OutputFormat::Text => {
            output::print_success(&format!("Appended event {}", event.id), format)
        }
        OutputFormat::Json => output::print_json(&event)?,
    }
    Ok(())
}
