//! # Observability
//!
//! Logging setup shared by every outbox entrypoint.
//!
//! Components never configure logging themselves. They emit `tracing`
//! events with structured fields, and the binary calls
//! [`init_with_config`] once at startup to decide where those events go:
//!
//! - a JSONL file (one object per line, append-only, flushed per line) so
//!   several `outboxctl` invocations triggered by cron can share one file
//! - an optional compact stderr stream for operators running commands by hand
//!
//! ```text
//! tail -f ~/.hotel-outbox/logs/outbox.jsonl | jq 'select(.level == "WARN")'
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "outboxctl".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! })?;
//! ```

mod file_sink;
mod json_layer;

pub use file_sink::{FileSink, FileSinkFactory};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name written into every JSONL line (e.g. "outboxctl").
    pub service_name: String,

    /// Default filter directive. `RUST_LOG` wins when set.
    pub default_level: String,

    /// JSONL destination. Without one, only stderr output is installed.
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with only a service name: stderr output at `info`.
pub fn init(service_name: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        also_stderr: true,
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
///
/// Fails only when the log file cannot be opened. Installing twice is a
/// no-op for the second caller, which keeps test binaries that share a
/// process from tripping over each other.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let json_layer = match &config.log_path {
        Some(path) => {
            let sink = FileSink::open(path)?;
            Some(
                JsonLayer::new(config.service_name.clone(), FileSinkFactory::new(sink))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    // Without a file there must be somewhere for events to go.
    let stderr_layer = if config.also_stderr || config.log_path.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_filter(filter()),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "observability initialized"
        );
    }
    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
