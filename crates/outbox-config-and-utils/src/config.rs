//! Outbox configuration.
//!
//! Loaded from `<base>/config.json` when present, otherwise defaults. A
//! handful of operational knobs can be overridden from the environment so a
//! cron entry can tweak them without editing the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `OUTBOX_LOG_LEVEL` | `log_level` |
//! | `OUTBOX_DATABASE_PATH` | `database_path` |
//! | `OUTBOX_BATCH_SIZE` | `worker.batch_size` |
//! | `OUTBOX_CONCURRENCY` | `worker.concurrency` |

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default retention window for `cleanup`, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Destination of routes and events that do not name one.
pub const DEFAULT_DESTINATION: &str = "default";

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Event store location. Defaults to `<base>/outbox.sqlite`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Retention used by `cleanup` when no explicit value is given.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Webhook routes. Each `(destination, event_type)` pair appears once.
    #[serde(default)]
    pub webhooks: Vec<WebhookRoute>,
}

/// Batch and execution bounds for one `process_outbox` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// PROCESSING rows claimed longer ago than this are requeued before each
    /// batch. `null` disables the sweep.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: Option<u64>,
}

/// Backoff policy and attempt ceiling applied to newly appended events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the delay to randomize (0.1 = ±10%).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

/// A webhook endpoint for one destination.
///
/// With `event_type` unset the route receives every event addressed to
/// `destination`; otherwise only that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRoute {
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default)]
    pub event_type: Option<String>,
    pub url: String,
    #[serde(default)]
    pub format: WebhookBodyFormat,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Request body shape for a webhook route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookBodyFormat {
    /// Event id, type, destination, attempt and timestamp around the payload.
    #[default]
    Envelope,
    /// Event type and payload only.
    Compact,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> Option<u64> {
    Some(300)
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            handler_timeout_secs: default_handler_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: None,
            worker: WorkerSettings::default(),
            retry: RetrySettings::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
            webhooks: Vec::new(),
        }
    }
}

impl OutboxConfig {
    /// Load `<base>/config.json` (or defaults), apply environment overrides,
    /// and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.finish()
    }

    /// Like [`load`](Self::load), but from an explicit file that must exist.
    pub fn load_explicit(path: &Path) -> CoreResult<Self> {
        Self::load_from_file(path)?.finish()
    }

    /// Load configuration from a specific file without env overrides.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OutboxConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Resolved event store path.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    fn finish(mut self) -> CoreResult<Self> {
        self.load_from_env();
        self.validate()?;
        Ok(self)
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`. Unparseable numbers are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(level) = get("OUTBOX_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = get("OUTBOX_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = get("OUTBOX_BATCH_SIZE").and_then(|raw| raw.parse().ok()) {
            self.worker.batch_size = size;
        }
        if let Some(n) = get("OUTBOX_CONCURRENCY").and_then(|raw| raw.parse().ok()) {
            self.worker.concurrency = n;
        }
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        let worker = &self.worker;
        if worker.batch_size == 0 {
            return Err(CoreError::Config("worker.batch_size must be at least 1".into()));
        }
        if worker.concurrency == 0 {
            return Err(CoreError::Config("worker.concurrency must be at least 1".into()));
        }
        if worker.handler_timeout_secs == 0 {
            return Err(CoreError::Config(
                "worker.handler_timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(stale) = worker.stale_after_secs {
            if stale <= worker.handler_timeout_secs {
                return Err(CoreError::Config(format!(
                    "worker.stale_after_secs ({}) must exceed worker.handler_timeout_secs ({})",
                    stale, worker.handler_timeout_secs
                )));
            }
        }

        let retry = &self.retry;
        if retry.max_retries == 0 {
            return Err(CoreError::Config("retry.max_retries must be at least 1".into()));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(CoreError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(CoreError::Config(format!(
                "retry.jitter_ratio must be within 0.0..=1.0, got {}",
                retry.jitter_ratio
            )));
        }

        if !(1..=365).contains(&self.retention_days) {
            return Err(CoreError::Config(format!(
                "retention_days must be within 1..=365, got {}",
                self.retention_days
            )));
        }

        let mut seen = HashSet::new();
        for route in &self.webhooks {
            route.parsed_url()?;
            if route.destination.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "webhook for {} has an empty destination",
                    route.url
                )));
            }
            if matches!(&route.event_type, Some(t) if t.trim().is_empty()) {
                return Err(CoreError::Config(format!(
                    "webhook for {} has an empty event_type",
                    route.url
                )));
            }
            if !seen.insert((route.destination.as_str(), route.event_type.as_deref())) {
                return Err(CoreError::Config(format!(
                    "webhook route {} is configured more than once",
                    route.label()
                )));
            }
        }
        Ok(())
    }
}

impl WebhookRoute {
    /// `destination/event_type`, or `destination/*` for a catch-all.
    pub fn label(&self) -> String {
        format!(
            "{}/{}",
            self.destination,
            self.event_type.as_deref().unwrap_or("*")
        )
    }

    pub fn parsed_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CoreError::Config(format!(
                "webhook {} uses unsupported scheme {}",
                self.label(),
                other
            ))),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
