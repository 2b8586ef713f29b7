//! Test harness for worker tests.
//!
//! Provides:
//! - TestHarness: an in-memory or file-backed store plus worker construction
//! - MockDownstream: an external system that deduplicates on event id

use crate::{OutboxWorker, WorkerConfig};
use event_dispatch::{DispatchRegistry, HandlerError};
use outbox_database::{EventStatus, EventStore, IntegrationEvent, NewIntegrationEvent};
use retry_scheduler::BackoffPolicy;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Worker config with no backoff wait and no stale sweep.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        batch_size: 50,
        concurrency: 4,
        handler_timeout: Duration::from_secs(2),
        stale_after: None,
        backoff: BackoffPolicy::immediate(),
    }
}

pub struct TestHarness {
    pub store: EventStore,
    db_path: Option<PathBuf>,
    _temp_dir: Option<TempDir>,
}

impl TestHarness {
    pub async fn in_memory() -> Self {
        Self {
            store: EventStore::open_in_memory().await.unwrap(),
            db_path: None,
            _temp_dir: None,
        }
    }

    /// File-backed store, so other connections can be opened on it.
    pub async fn file_backed() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("outbox.sqlite");
        Self {
            store: EventStore::open(&db_path).await.unwrap(),
            db_path: Some(db_path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// A second, independent connection to the same database file.
    pub async fn connect(&self) -> EventStore {
        let path = self.db_path.as_ref().expect("file-backed harness");
        EventStore::open(path).await.unwrap()
    }

    pub fn worker(&self, registry: DispatchRegistry, config: WorkerConfig) -> OutboxWorker {
        OutboxWorker::new(self.store.clone(), Arc::new(registry), config)
    }

    pub async fn append(&self, event_type: &str, payload: &str, max_retries: u32) -> IntegrationEvent {
        self.store
            .append(NewIntegrationEvent::new(event_type, payload, max_retries))
            .await
            .unwrap()
    }

    pub async fn append_to(
        &self,
        destination: &str,
        event_type: &str,
        payload: &str,
        max_retries: u32,
    ) -> IntegrationEvent {
        self.store
            .append(
                NewIntegrationEvent::new(event_type, payload, max_retries)
                    .with_destination(destination),
            )
            .await
            .unwrap()
    }

    pub async fn event(&self, id: &str) -> IntegrationEvent {
        self.store.get(id).await.unwrap().unwrap()
    }

    pub async fn status(&self, id: &str) -> EventStatus {
        self.event(id).await.status
    }
}

/// Scripted reply for one call to the downstream.
#[derive(Debug, Clone)]
pub enum Reply {
    Accept,
    Unavailable,
    Reject,
}

/// An external system that applies each event id at most once.
///
/// Every call is recorded in `calls`; `effects` counts applications per id,
/// which stays at one no matter how many times an id is delivered.
#[derive(Default)]
pub struct MockDownstream {
    calls: Mutex<Vec<String>>,
    effects: Mutex<HashMap<String, u32>>,
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
}

impl MockDownstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for `event_id`; after they run out every call is accepted.
    pub fn script(&self, event_id: &str, replies: Vec<Reply>) {
        self.script
            .lock()
            .unwrap()
            .insert(event_id.to_string(), replies.into());
    }

    /// Record a call and apply its effect if the reply is `Accept`.
    pub fn call(&self, event_id: &str) -> Result<(), HandlerError> {
        self.calls.lock().unwrap().push(event_id.to_string());

        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(event_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Accept);

        match reply {
            Reply::Accept => {
                self.apply(event_id);
                Ok(())
            }
            Reply::Unavailable => Err(HandlerError::retryable("HTTP 503 Service Unavailable")),
            Reply::Reject => Err(HandlerError::fatal("HTTP 400 Bad Request")),
        }
    }

    /// Apply the effect without a reply, as when the response is lost.
    pub fn apply(&self, event_id: &str) {
        self.effects
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_insert(1);
    }

    pub fn calls_for(&self, event_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == event_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn effects_for(&self, event_id: &str) -> u32 {
        self.effects.lock().unwrap().get(event_id).copied().unwrap_or(0)
    }

    pub fn distinct_effects(&self) -> usize {
        self.effects.lock().unwrap().len()
    }
}

/// Registry with `event_type` routed to `downstream`.
pub fn downstream_registry(event_type: &str, downstream: Arc<MockDownstream>) -> DispatchRegistry {
    let mut registry = DispatchRegistry::new();
    registry.register_fn(event_type, move |delivery| {
        let downstream = downstream.clone();
        async move { downstream.call(&delivery.event_id) }
    });
    registry
}
