//! Logging initialization for the outbox tools.
//!
//! Everything goes through the observability crate: JSONL lines appended to
//! `<base>/logs/outbox.jsonl`, optionally mirrored to stderr in compact form
//! for long-running commands.

use crate::{CoreResult, Paths};

/// Initialize logging for `outboxctl`.
///
/// `RUST_LOG` takes precedence over `level`.
///
/// ```ignore
/// init_logging(&config.log_level, &paths, true)?;
/// tracing::info!("outboxctl started");
/// ```
pub fn init_logging(level: &str, paths: &Paths, also_stderr: bool) -> CoreResult<()> {
    paths.ensure_dirs()?;
    observability::init_with_config(observability::LogConfig {
        service_name: "outboxctl".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    Ok(())
}
