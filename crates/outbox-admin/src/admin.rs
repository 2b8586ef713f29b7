use crate::types::{
    CleanupResult, EventList, ListQuery, OutboxStats, Pagination, RetryAllResult, SweepResult,
    DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, MAX_RETENTION_DAYS,
};
use crate::{AdminError, AdminResult};
use chrono::{Duration as ChronoDuration, Utc};
use outbox_database::{EventStatus, EventStore, IntegrationEvent, RetryReset};
use outbox_worker::{OutboxWorker, ProcessSummary};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default retention for `cleanup`.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Operator view of the outbox.
///
/// Every mutation here is privileged. Callers decide who may reach it.
pub struct OutboxAdmin {
    store: EventStore,
    worker: Arc<OutboxWorker>,
}

impl OutboxAdmin {
    pub fn new(store: EventStore, worker: Arc<OutboxWorker>) -> Self {
        Self { store, worker }
    }

    /// Admin over the worker's own store.
    pub fn for_worker(worker: Arc<OutboxWorker>) -> Self {
        Self::new(worker.store().clone(), worker)
    }

    pub async fn stats(&self) -> AdminResult<OutboxStats> {
        Ok(self.store.count_by_status().await?.into())
    }

    /// Most recent first.
    pub async fn list(&self, query: ListQuery) -> AdminResult<EventList> {
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(AdminError::InvalidArgument(format!(
                "limit must be between 1 and {}, got {}",
                MAX_LIST_LIMIT, limit
            )));
        }
        let offset = query.offset.unwrap_or(0);
        if i64::try_from(offset).is_err() {
            return Err(AdminError::InvalidArgument(format!(
                "offset must be at most {}, got {}",
                i64::MAX,
                offset
            )));
        }

        let page = self.store.list_by_status(query.status, limit, offset).await?;
        let seen = offset.saturating_add(page.events.len());
        let has_more = (seen as u64) < page.total;
        Ok(EventList {
            events: page.events,
            pagination: Pagination {
                limit,
                offset,
                total: page.total,
                has_more,
            },
        })
    }

    pub async fn get(&self, id: &str) -> AdminResult<IntegrationEvent> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AdminError::NotFound(id.to_string()))
    }

    /// Run one worker batch now.
    pub async fn process(&self) -> AdminResult<ProcessSummary> {
        Ok(self.worker.process_outbox().await?)
    }

    /// Put one FAILED or DEAD_LETTER event back in the queue with a fresh
    /// attempt budget.
    pub async fn retry(&self, id: &str) -> AdminResult<IntegrationEvent> {
        match self.store.reset_for_retry(id, Utc::now()).await? {
            RetryReset::Reset(event) => {
                info!(event_id = %id, event_type = %event.event_type, "Event reset for retry");
                Ok(event)
            }
            RetryReset::NotFound => Err(AdminError::NotFound(id.to_string())),
            RetryReset::NotRetryable(status) => Err(AdminError::InvalidState {
                id: id.to_string(),
                status,
            }),
        }
    }

    /// Reset every DEAD_LETTER event.
    pub async fn retry_all(&self) -> AdminResult<RetryAllResult> {
        let count = self.store.reset_all_dead_letters(Utc::now()).await?;
        info!(count, "Dead-lettered events reset for retry");
        Ok(RetryAllResult { count })
    }

    /// Delete COMPLETED events older than `retention_days` (default 30).
    pub async fn cleanup(&self, retention_days: Option<u32>) -> AdminResult<CleanupResult> {
        let days = retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        self.purge(days, EventStatus::Completed).await
    }

    /// Delete DEAD_LETTER events older than `retention_days`.
    pub async fn purge_dead_letters(&self, retention_days: u32) -> AdminResult<CleanupResult> {
        self.purge(retention_days, EventStatus::DeadLetter).await
    }

    /// Take back PROCESSING events whose attempt started more than
    /// `threshold` ago.
    ///
    /// The threshold must exceed the worker's handler timeout, otherwise
    /// attempts still in flight would be taken from their worker.
    pub async fn sweep_stale(&self, threshold: Duration) -> AdminResult<SweepResult> {
        let handler_timeout = self.worker.config().handler_timeout;
        if threshold <= handler_timeout {
            return Err(AdminError::InvalidArgument(format!(
                "stale threshold must exceed the handler timeout of {}ms, got {}ms",
                handler_timeout.as_millis(),
                threshold.as_millis()
            )));
        }

        let swept = self.worker.sweep_stale(threshold).await?;
        Ok(SweepResult {
            requeued_count: swept.requeued.len(),
            dead_lettered_count: swept.dead_lettered.len(),
            event_ids: swept.requeued,
            dead_lettered_ids: swept.dead_lettered,
        })
    }

    async fn purge(&self, retention_days: u32, status: EventStatus) -> AdminResult<CleanupResult> {
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(AdminError::InvalidArgument(format!(
                "retention days must be between 1 and {}, got {}",
                MAX_RETENTION_DAYS, retention_days
            )));
        }

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let deleted_count = self.store.purge_older_than(cutoff, vec![status]).await?;
        info!(
            status = %status,
            retention_days,
            deleted = deleted_count,
            "Purged old outbox events"
        );
        Ok(CleanupResult { deleted_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_dispatch::{DispatchRegistry, HandlerError};
    use outbox_database::NewIntegrationEvent;
    use outbox_worker::WorkerConfig;
    use retry_scheduler::BackoffPolicy;

    async fn setup() -> OutboxAdmin {
        let store = EventStore::open_in_memory().await.unwrap();
        let mut registry = DispatchRegistry::new();
        registry
            .register_fn("sheet.sync", |_d| async { Ok(()) })
            .register_fn("review.imported", |_d| async {
                Err(HandlerError::fatal("HTTP 400 Bad Request"))
            });
        let config = WorkerConfig {
            stale_after: None,
            handler_timeout: Duration::from_millis(5),
            backoff: BackoffPolicy::immediate(),
            ..WorkerConfig::default()
        };
        let worker = Arc::new(OutboxWorker::new(store, Arc::new(registry), config));
        OutboxAdmin::for_worker(worker)
    }

    async fn append(admin: &OutboxAdmin, event_type: &str) -> IntegrationEvent {
        admin
            .store
            .append(NewIntegrationEvent::new(event_type, "{}", 3))
            .await
            .unwrap()
    }

    /// Move terminal timestamps back by `days`.
    async fn age_events(admin: &OutboxAdmin, days: i64) {
        let stamp = outbox_database::queries::format_timestamp(Utc::now() - ChronoDuration::days(days));
        admin
            .store
            .database()
            .call_sqlite(move |conn| {
                conn.execute(
                    "UPDATE integration_events SET updated_at = ?1,
                     completed_at = CASE WHEN completed_at IS NULL THEN NULL ELSE ?1 END",
                    [stamp],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_counts_and_total() {
        let admin = setup().await;
        append(&admin, "sheet.sync").await;
        append(&admin, "sheet.sync").await;
        append(&admin, "review.imported").await;
        admin.process().await.unwrap();
        append(&admin, "sheet.sync").await;

        let stats = admin.stats().await.unwrap();
        assert_eq!(
            stats,
            OutboxStats {
                pending: 1,
                processing: 0,
                completed: 2,
                failed: 0,
                dead_letter: 1,
                total: 4,
            }
        );

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["deadLetter"], 1);
        assert_eq!(json["total"], 4);
    }

    #[tokio::test]
    async fn test_list_paginates_most_recent_first() {
        let admin = setup().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(append(&admin, "sheet.sync").await.id);
        }

        let first = admin
            .list(ListQuery {
                limit: Some(2),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.events[0].id, ids[4]);
        assert_eq!(first.events[1].id, ids[3]);
        assert_eq!(
            first.pagination,
            Pagination {
                limit: 2,
                offset: 0,
                total: 5,
                has_more: true,
            }
        );

        let last = admin
            .list(ListQuery {
                limit: Some(2),
                offset: Some(4),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(last.events.len(), 1);
        assert_eq!(last.events[0].id, ids[0]);
        assert!(!last.pagination.has_more);

        // An exactly full last page has nothing more.
        // Past the end is an empty page, not a wrap to the start.
        let beyond = admin
            .list(ListQuery {
                limit: Some(2),
                offset: Some(10),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(beyond.events.is_empty());
        assert!(!beyond.pagination.has_more);

        let exact = admin
            .list(ListQuery {
                limit: Some(5),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(!exact.pagination.has_more);

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["pagination"]["hasMore"], true);
        assert_eq!(json["events"][0]["eventType"], "sheet.sync");
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let admin = setup().await;
        append(&admin, "sheet.sync").await;
        let dead = append(&admin, "review.imported").await;
        admin.process().await.unwrap();

        let list = admin
            .list(ListQuery::with_status(EventStatus::DeadLetter))
            .await
            .unwrap();
        assert_eq!(list.pagination.total, 1);
        assert_eq!(list.pagination.limit, DEFAULT_LIST_LIMIT);
        assert_eq!(list.events[0].id, dead.id);
    }

    #[tokio::test]
    async fn test_list_rejects_out_of_range_limit() {
        let admin = setup().await;
        for limit in [0, 101] {
            let err = admin
                .list(ListQuery {
                    limit: Some(limit),
                    ..ListQuery::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, AdminError::InvalidArgument(_)));
        }
        assert!(admin
            .list(ListQuery {
                limit: Some(100),
                ..ListQuery::default()
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_list_rejects_offset_beyond_sqlite_range() {
        let admin = setup().await;
        append(&admin, "sheet.sync").await;

        for offset in [usize::MAX, i64::MAX as usize + 1] {
            let err = admin
                .list(ListQuery {
                    limit: Some(10),
                    offset: Some(offset),
                    ..ListQuery::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, AdminError::InvalidArgument(_)), "{:?}", err);
        }

        let page = admin
            .list(ListQuery {
                limit: Some(10),
                offset: Some(i64::MAX as usize),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(page.events.is_empty());
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let admin = setup().await;
        let event = append(&admin, "sheet.sync").await;

        assert_eq!(admin.get(&event.id).await.unwrap().id, event.id);
        assert!(matches!(
            admin.get("missing").await.unwrap_err(),
            AdminError::NotFound(id) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_process_returns_summary() {
        let admin = setup().await;
        append(&admin, "sheet.sync").await;
        append(&admin, "review.imported").await;

        let summary = admin.process().await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_retry_state_rules() {
        let admin = setup().await;
        let dead = append(&admin, "review.imported").await;
        admin.process().await.unwrap();
        let pending = append(&admin, "sheet.sync").await;

        let reset = admin.retry(&dead.id).await.unwrap();
        assert_eq!(reset.status, EventStatus::Pending);
        assert_eq!(reset.retry_count, 0);

        match admin.retry(&pending.id).await.unwrap_err() {
            AdminError::InvalidState { id, status } => {
                assert_eq!(id, pending.id);
                assert_eq!(status, EventStatus::Pending);
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }
        assert!(matches!(
            admin.retry("missing").await.unwrap_err(),
            AdminError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_retry_all_returns_count() {
        let admin = setup().await;
        for _ in 0..3 {
            append(&admin, "review.imported").await;
        }
        append(&admin, "sheet.sync").await;
        admin.process().await.unwrap();

        assert_eq!(admin.retry_all().await.unwrap(), RetryAllResult { count: 3 });
        assert_eq!(admin.retry_all().await.unwrap().count, 0);
        assert_eq!(admin.stats().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention_and_scope() {
        let admin = setup().await;
        append(&admin, "sheet.sync").await;
        append(&admin, "review.imported").await;
        admin.process().await.unwrap();
        age_events(&admin, 40).await;
        append(&admin, "sheet.sync").await;

        assert_eq!(admin.cleanup(Some(60)).await.unwrap().deleted_count, 0);
        assert_eq!(
            admin.cleanup(None).await.unwrap(),
            CleanupResult { deleted_count: 1 }
        );

        let stats = admin.stats().await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.pending, 1);

        assert_eq!(admin.purge_dead_letters(30).await.unwrap().deleted_count, 1);
        assert_eq!(admin.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_cleanup_rejects_out_of_range_retention() {
        let admin = setup().await;
        for days in [0, 366] {
            assert!(matches!(
                admin.cleanup(Some(days)).await.unwrap_err(),
                AdminError::InvalidArgument(_)
            ));
            assert!(matches!(
                admin.purge_dead_letters(days).await.unwrap_err(),
                AdminError::InvalidArgument(_)
            ));
        }
        assert!(admin.cleanup(Some(365)).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_stale_reports_requeued_ids() {
        let admin = setup().await;
        let event = append(&admin, "sheet.sync").await;
        admin.store.claim_due_batch(10, Utc::now()).await.unwrap();

        assert_eq!(
            admin.sweep_stale(Duration::from_secs(300)).await.unwrap().requeued_count,
            0
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = admin.sweep_stale(Duration::from_millis(20)).await.unwrap();
        assert_eq!(result.event_ids, vec![event.id.clone()]);
        assert_eq!(result.requeued_count, 1);
        assert!(result.dead_lettered_ids.is_empty());

        let stored = admin.get(&event.id).await.unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_stale_rejects_threshold_within_handler_timeout() {
        let admin = setup().await;
        let event = append(&admin, "sheet.sync").await;
        admin.store.claim_due_batch(10, Utc::now()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Handler timeout in `setup` is 5ms.
        for threshold in [Duration::ZERO, Duration::from_millis(5)] {
            assert!(matches!(
                admin.sweep_stale(threshold).await.unwrap_err(),
                AdminError::InvalidArgument(_)
            ));
        }
        assert_eq!(
            admin.get(&event.id).await.unwrap().status,
            EventStatus::Processing
        );
    }
}
