use crate::{WorkerConfig, WorkerResult};
use chrono::{DateTime, Utc};
use event_dispatch::{Delivery, DispatchRegistry, EventHandler, HandlerError, HandlerResult};
use futures_util::stream::{self, StreamExt};
use outbox_database::{EventStore, FailureDisposition, IntegrationEvent, StaleSweep};
use retry_scheduler::{decide, jitter_sample, RetryDecision};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counts for one `process_outbox` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    /// Events claimed by this invocation.
    pub processed: usize,
    pub succeeded: usize,
    /// Failed and rescheduled.
    pub failed: usize,
    pub dead_lettered: usize,
    /// Claims the stale sweep took over before this run recorded an outcome.
    /// Whatever the handler did is left for the new owner to redo.
    pub superseded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Rescheduled,
    DeadLettered,
    Superseded,
}

/// Claims due events and runs their handlers.
///
/// Holds no state between invocations: everything it needs to resume after
/// a crash lives in the store.
pub struct OutboxWorker {
    store: EventStore,
    registry: Arc<DispatchRegistry>,
    config: WorkerConfig,
}

impl OutboxWorker {
    pub fn new(store: EventStore, registry: Arc<DispatchRegistry>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process one batch of due events.
    ///
    /// 1. Take back stale PROCESSING events (when `stale_after` is set)
    /// 2. Claim up to `batch_size` due events
    /// 3. Run handlers, at most `concurrency` at a time, restarting each
    ///    claim's staleness clock as its handler starts
    /// 4. Record each outcome under the claim token
    ///
    /// A store error aborts the run. Events claimed but not yet recorded
    /// stay PROCESSING until the next stale sweep picks them up.
    pub async fn process_outbox(&self) -> WorkerResult<ProcessSummary> {
        if let Some(stale_after) = self.config.stale_after {
            self.sweep_stale(stale_after).await?;
        }

        let events = self
            .store
            .claim_due_batch(self.config.batch_size, Utc::now())
            .await?;
        if events.is_empty() {
            debug!("No due outbox events");
            return Ok(ProcessSummary::default());
        }

        let mut summary = ProcessSummary {
            processed: events.len(),
            ..ProcessSummary::default()
        };

        let mut outcomes = stream::iter(events)
            .map(|event| self.deliver(event))
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            match outcome? {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Rescheduled => summary.failed += 1,
                Outcome::DeadLettered => summary.dead_lettered += 1,
                Outcome::Superseded => summary.superseded += 1,
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            dead_lettered = summary.dead_lettered,
            superseded = summary.superseded,
            "Outbox batch processed"
        );
        Ok(summary)
    }

    /// Take back PROCESSING events whose attempt started more than
    /// `threshold` ago. The lost attempt counts against the event's budget.
    pub async fn sweep_stale(&self, threshold: Duration) -> WorkerResult<StaleSweep> {
        let now = Utc::now();
        let stale_before = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let swept = self.store.requeue_stale_processing(stale_before, now).await?;
        for id in &swept.requeued {
            warn!(event_id = %id, "Requeued stale PROCESSING event");
        }
        for id in &swept.dead_lettered {
            error!(event_id = %id, "Stale PROCESSING event moved to dead letter");
        }
        Ok(swept)
    }

    /// Run `process_outbox` every `every` until `shutdown` fires.
    ///
    /// Failed runs are logged and retried on the next tick.
    pub async fn run_periodic(&self, every: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = every.as_millis() as u64, "Outbox worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Outbox worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_outbox().await {
                        error!(error = %e, "Outbox run failed");
                    }
                }
            }
        }
    }

    async fn deliver(&self, event: IntegrationEvent) -> WorkerResult<Outcome> {
        let Some(claim_id) = event.claim_id.clone() else {
            warn!(event_id = %event.id, "Claimed event came back without a claim token");
            return Ok(Outcome::Superseded);
        };

        if !self.store.start_attempt(&event.id, &claim_id, Utc::now()).await? {
            warn!(event_id = %event.id, "Claim taken over before the handler started");
            return Ok(Outcome::Superseded);
        }

        let delivery = Delivery {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            destination: event.destination.clone(),
            payload: event.payload,
            attempt: event.retry_count.saturating_add(1),
        };

        let result = match self.registry.resolve(&event.destination, &event.event_type) {
            Ok(handler) => self.invoke(handler, delivery).await,
            Err(e) => Err(e),
        };

        let now = Utc::now();
        let err = match result {
            Ok(()) => {
                if !self.store.record_success(&event.id, &claim_id, now).await? {
                    warn!(event_id = %event.id, "Claim taken over before the success was recorded");
                    return Ok(Outcome::Superseded);
                }
                debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    destination = %event.destination,
                    "Event delivered"
                );
                return Ok(Outcome::Succeeded);
            }
            Err(err) => err,
        };

        let disposition = match &err {
            HandlerError::Fatal(_) => FailureDisposition::DeadLetter,
            HandlerError::Retryable(_) => self.schedule_retry(event.retry_count, event.max_retries, now),
        };
        let message = err.to_string();

        if !self
            .store
            .record_failure(&event.id, &claim_id, &message, disposition, now)
            .await?
        {
            warn!(event_id = %event.id, "Claim taken over before the failure was recorded");
            return Ok(Outcome::Superseded);
        }

        match disposition {
            FailureDisposition::Retry { next_retry_at } => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    destination = %event.destination,
                    attempt = event.retry_count + 1,
                    max_retries = event.max_retries,
                    next_retry_at = %next_retry_at,
                    error = %message,
                    "Event delivery failed; retry scheduled"
                );
                Ok(Outcome::Rescheduled)
            }
            FailureDisposition::DeadLetter => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempt = event.retry_count + 1,
                    retryable = err.is_retryable(),
                    error = %message,
                    "Event moved to dead letter"
                );
                Ok(Outcome::DeadLettered)
            }
        }
    }

    fn schedule_retry(
        &self,
        retry_count: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        let sample = jitter_sample(&mut rand::thread_rng());
        match decide(retry_count, &self.config.backoff, max_retries, sample) {
            RetryDecision::RetryAfter(delay) => FailureDisposition::Retry {
                next_retry_at: due_after(now, delay),
            },
            RetryDecision::DeadLetter => FailureDisposition::DeadLetter,
        }
    }

    /// Run one handler in its own task under the handler timeout.
    async fn invoke(&self, handler: Arc<dyn EventHandler>, delivery: Delivery) -> HandlerResult {
        let timeout = self.config.handler_timeout;
        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, handler.handle(&delivery)).await
        });

        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HandlerError::retryable(format!(
                "handler timed out after {}ms",
                timeout.as_millis()
            ))),
            Err(e) if e.is_panic() => Err(HandlerError::retryable(format!(
                "handler panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(HandlerError::retryable(format!("handler task failed: {}", e))),
        }
    }
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
