//! # Outbox Worker
//!
//! Drains the integration outbox: claims due PENDING events, runs the
//! registered handler for each, and records the outcome.
//!
//! ## Invocation model
//!
//! One call to [`OutboxWorker::process_outbox`] handles one bounded batch.
//! It is meant to be triggered from outside (cron, `outboxctl process`, a
//! ticker via [`OutboxWorker::run_periodic`]). Overlapping invocations,
//! in this process or another, are safe because the store claim is atomic:
//! each event is handed to at most one of them.
//!
//! ## Outcomes
//!
//! ```text
//! handler Ok                         → COMPLETED
//! Retryable, attempts left           → PENDING, next_retry_at = now + backoff
//! Retryable, last attempt            → DEAD_LETTER
//! Fatal / no handler registered      → DEAD_LETTER
//! timeout / panic                    → treated as Retryable
//! ```
//!
//! Delivery is at least once. A crash between a handler's side effect and
//! the outcome being written leaves the event PROCESSING; the stale sweep
//! puts it back in PENDING and it is delivered again.

mod config;
mod error;
mod worker;

#[cfg(test)]
mod tests;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use worker::{OutboxWorker, ProcessSummary};
