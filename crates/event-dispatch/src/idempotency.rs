//! In-process duplicate suppression for handlers.
//!
//! [`IdempotentHandler`] remembers which event ids it has completed (for a
//! TTL) and which are currently running. A repeat delivery of a completed id
//! is acknowledged without calling the inner handler; a delivery that
//! overlaps a running one is refused as retryable.
//!
//! This only covers repeats seen by one process. Cross-process and
//! post-restart duplicates still need the downstream idempotency key.

use crate::{Delivery, EventHandler, HandlerError, HandlerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InFlight,
    Completed,
}

#[derive(Debug, Clone)]
struct Entry {
    expires_at: Instant,
    state: EntryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginResult {
    /// First sighting; the caller now owns the key.
    New,
    InFlight,
    Completed,
}

/// TTL-bounded record of event ids seen by this process.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    ttl: Duration,
    entries: HashMap<String, Entry>,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn begin(&mut self, key: &str, now: Instant) -> BeginResult {
        self.evict_expired(now);

        if let Some(entry) = self.entries.get(key) {
            return match entry.state {
                EntryState::InFlight => BeginResult::InFlight,
                EntryState::Completed => BeginResult::Completed,
            };
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                expires_at: now + self.ttl,
                state: EntryState::InFlight,
            },
        );
        BeginResult::New
    }

    pub fn complete(&mut self, key: &str, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                expires_at: now + self.ttl,
                state: EntryState::Completed,
            },
        );
    }

    /// Forget `key`, e.g. after a failed attempt so the next one runs.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

/// Wraps a handler with an [`IdempotencyStore`] keyed by event id.
pub struct IdempotentHandler<H> {
    inner: H,
    store: Mutex<IdempotencyStore>,
}

impl<H> IdempotentHandler<H> {
    pub fn new(inner: H) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: H, ttl: Duration) -> Self {
        Self {
            inner,
            store: Mutex::new(IdempotencyStore::new(ttl)),
        }
    }
}

/// Releases an in-flight key if the attempt is dropped mid-way (timeout,
/// panic), so the next delivery is not refused until the TTL expires.
struct InFlightGuard<'a> {
    store: &'a Mutex<IdempotencyStore>,
    key: &'a str,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.lock().remove(self.key);
        }
    }
}

#[async_trait]
impl<H> EventHandler for IdempotentHandler<H>
where
    H: EventHandler,
{
    async fn handle(&self, delivery: &Delivery) -> HandlerResult {
        let key = delivery.event_id.as_str();
        let begin = self.store.lock().begin(key, Instant::now());

        match begin {
            BeginResult::Completed => {
                debug!(event_id = %key, "Duplicate delivery of completed event; skipping");
                return Ok(());
            }
            BeginResult::InFlight => {
                return Err(HandlerError::retryable(format!(
                    "delivery of {} already in progress",
                    key
                )));
            }
            BeginResult::New => {}
        }

        let mut guard = InFlightGuard {
            store: &self.store,
            key,
            armed: true,
        };
        let result = self.inner.handle(delivery).await;
        guard.armed = false;

        let mut store = self.store.lock();
        match &result {
            Ok(()) => store.complete(key, Instant::now()),
            Err(_) => store.remove(key),
        }
        result
    }
}
