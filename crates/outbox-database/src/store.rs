//! Async facade over the outbox queries.
//!
//! `EventStore` is what the worker and the admin surface hold. Producers that
//! already own a transaction call [`crate::queries::append_event`] directly
//! instead.

use crate::{
    queries, AsyncDatabase, DatabaseError, DatabaseResult, EventStatus, FailureDisposition,
    IntegrationEvent, NewIntegrationEvent, StaleSweep, StatusCounts,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// One page of events plus the size of the filtered set.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<IntegrationEvent>,
    pub total: u64,
}

/// Result of an operator retry of a single event.
#[derive(Debug, Clone)]
pub enum RetryReset {
    /// Back in PENDING with a fresh attempt budget.
    Reset(IntegrationEvent),
    NotFound,
    /// Only FAILED and DEAD_LETTER events can be retried.
    NotRetryable(EventStatus),
}

/// Durable store of [`IntegrationEvent`]s.
#[derive(Clone)]
pub struct EventStore {
    db: AsyncDatabase,
}

impl EventStore {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        Ok(Self::new(AsyncDatabase::open(path).await?))
    }

    pub async fn open_in_memory() -> DatabaseResult<Self> {
        Ok(Self::new(AsyncDatabase::open_in_memory().await?))
    }

    /// The underlying executor, for producers that need their own transaction.
    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Append a PENDING event due now.
    pub async fn append(&self, event: NewIntegrationEvent) -> DatabaseResult<IntegrationEvent> {
        self.db
            .call(move |conn| queries::append_event(conn, &event, Utc::now()))
            .await
    }

    /// Serialize `payload` as JSON and append it.
    pub async fn append_json<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        payload: &T,
        max_retries: u32,
    ) -> DatabaseResult<IntegrationEvent> {
        let payload = serde_json::to_string(payload)?;
        self.append(NewIntegrationEvent::new(event_type, payload, max_retries))
            .await
    }

    /// Atomically claim up to `limit` due events.
    pub async fn claim_due_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<IntegrationEvent>> {
        let events = self
            .db
            .transaction(move |tx| queries::claim_due_batch(tx, limit, now))
            .await?;
        if !events.is_empty() {
            debug!(count = events.len(), "Claimed outbox batch");
        }
        Ok(events)
    }

    /// Mark the handler for a claimed event as started. False if the claim
    /// was taken over.
    pub async fn start_attempt(
        &self,
        id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let claim_id = claim_id.to_string();
        self.db
            .call(move |conn| queries::start_attempt(conn, &id, &claim_id, now))
            .await
    }

    pub async fn record_success(
        &self,
        id: &str,
        claim_id: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let claim_id = claim_id.to_string();
        self.db
            .call(move |conn| queries::record_success(conn, &id, &claim_id, now))
            .await
    }

    pub async fn record_failure(
        &self,
        id: &str,
        claim_id: &str,
        error: &str,
        disposition: FailureDisposition,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let claim_id = claim_id.to_string();
        let error = error.to_string();
        self.db
            .call(move |conn| {
                queries::record_failure(conn, &id, &claim_id, &error, disposition, now)
            })
            .await
    }

    /// Take back PROCESSING events whose attempt started before `stale_before`.
    pub async fn requeue_stale_processing(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<StaleSweep> {
        let swept = self
            .db
            .transaction(move |tx| queries::requeue_stale_processing(tx, stale_before, now))
            .await?;
        if !swept.is_empty() {
            info!(
                requeued = swept.requeued.len(),
                dead_lettered = swept.dead_lettered.len(),
                stale_before = %stale_before,
                "Took back stale PROCESSING events"
            );
        }
        Ok(swept)
    }

    pub async fn get(&self, id: &str) -> DatabaseResult<Option<IntegrationEvent>> {
        let id = id.to_string();
        self.db.call(move |conn| queries::get_event(conn, &id)).await
    }

    /// Most-recent-first page, optionally filtered by status.
    pub async fn list_by_status(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> DatabaseResult<EventPage> {
        self.db
            .call(move |conn| {
                let events = queries::list_events(conn, status, limit, offset)?;
                let total = queries::count_events(conn, status)?;
                Ok(EventPage { events, total })
            })
            .await
    }

    pub async fn count_by_status(&self) -> DatabaseResult<StatusCounts> {
        self.db.call(queries::count_by_status).await
    }

    /// Operator retry of one event.
    pub async fn reset_for_retry(&self, id: &str, now: DateTime<Utc>) -> DatabaseResult<RetryReset> {
        let id = id.to_string();
        self.db
            .transaction(move |tx| {
                let Some(event) = queries::get_event(tx, &id)? else {
                    return Ok(RetryReset::NotFound);
                };
                if !queries::reset_for_retry(tx, &id, now)? {
                    return Ok(RetryReset::NotRetryable(event.status));
                }
                let event = queries::get_event(tx, &id)?.ok_or_else(|| {
                    DatabaseError::NotFound(format!("event {} vanished during retry", id))
                })?;
                Ok(RetryReset::Reset(event))
            })
            .await
    }

    /// Reset every DEAD_LETTER event to PENDING.
    pub async fn reset_all_dead_letters(&self, now: DateTime<Utc>) -> DatabaseResult<usize> {
        self.db
            .call(move |conn| queries::reset_all_dead_letters(conn, now))
            .await
    }

    /// Delete terminal events of `statuses` older than `cutoff`.
    pub async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: Vec<EventStatus>,
    ) -> DatabaseResult<usize> {
        self.db
            .transaction(move |tx| queries::purge_older_than(tx, cutoff, &statuses))
            .await
    }
}
