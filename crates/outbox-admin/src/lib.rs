//! Operations surface for the integration outbox.
//!
//! Read: [`OutboxAdmin::stats`], [`OutboxAdmin::list`], [`OutboxAdmin::get`].
//! Mutate: [`OutboxAdmin::process`], [`OutboxAdmin::retry`],
//! [`OutboxAdmin::retry_all`], [`OutboxAdmin::cleanup`],
//! [`OutboxAdmin::purge_dead_letters`], [`OutboxAdmin::sweep_stale`].
//!
//! Response types serialize to camelCase JSON so they can be handed to a
//! dashboard unchanged.

mod admin;
mod error;
mod types;

pub use admin::{OutboxAdmin, DEFAULT_RETENTION_DAYS};
pub use error::{AdminError, AdminResult};
pub use types::{
    CleanupResult, EventList, ListQuery, OutboxStats, Pagination, RetryAllResult, SweepResult,
    DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, MAX_RETENTION_DAYS,
};
