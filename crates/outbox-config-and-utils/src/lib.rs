//! Configuration, file system layout, and logging setup for the outbox tools.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    OutboxConfig, RetrySettings, WebhookBodyFormat, WebhookRoute, WorkerSettings,
    DEFAULT_DESTINATION, DEFAULT_LOG_LEVEL, DEFAULT_RETENTION_DAYS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
