//! outboxctl command implementations.

mod events;
mod maintenance;
mod worker;

pub use events::{append, get, list, retry, retry_all, stats};
pub use maintenance::{cleanup, purge_dead_letters, sweep};
pub use worker::{process, watch};

use chrono::{DateTime, Utc};

/// Compact timestamp for text output.
fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
