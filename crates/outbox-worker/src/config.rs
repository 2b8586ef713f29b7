use outbox_config_and_utils::OutboxConfig;
use retry_scheduler::BackoffPolicy;
use std::time::Duration;

/// Execution bounds for one `process_outbox` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Maximum events claimed per invocation.
    pub batch_size: usize,
    /// Maximum handlers running at once.
    pub concurrency: usize,
    /// A handler still running after this is treated as a retryable failure.
    pub handler_timeout: Duration,
    /// Requeue PROCESSING events claimed longer ago than this before each
    /// batch. Must exceed `handler_timeout`.
    pub stale_after: Option<Duration>,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 4,
            handler_timeout: Duration::from_secs(30),
            stale_after: Some(Duration::from_secs(300)),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&OutboxConfig> for WorkerConfig {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            batch_size: config.worker.batch_size,
            concurrency: config.worker.concurrency,
            handler_timeout: Duration::from_secs(config.worker.handler_timeout_secs),
            stale_after: config.worker.stale_after_secs.map(Duration::from_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.retry.base_delay_ms),
                Duration::from_millis(config.retry.max_delay_ms),
            )
            .with_jitter(config.retry.jitter_ratio),
        }
    }
}
