//! SQLite event store for the integration outbox.
//!
//! This crate provides:
//! - `AsyncDatabase`: a dedicated-thread SQLite executor (tokio-rusqlite)
//! - Versioned migrations for the `integration_events` table
//! - Model types (`IntegrationEvent`, `EventStatus`, ...)
//! - Free query functions usable on any connection or transaction
//! - `EventStore`: the async facade the worker and admin surface use
//!
//! # Claims
//!
//! `claim_due_batch` is a single conditional `UPDATE … RETURNING` run in an
//! IMMEDIATE transaction. Whichever connection commits first wins a row;
//! the others see it as no longer PENDING. No application-level lock is
//! involved, so any number of worker processes can share one database file.
//!
//! # Producers
//!
//! ```ignore
//! store.database().transaction(move |tx| {
//!     tx.execute("UPDATE rooms SET status = 'clean' WHERE id = ?1", [room_id])?;
//!     queries::append_event(tx, &NewIntegrationEvent::new("room.cleaned", payload, 5), Utc::now())
//! }).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
pub use store::{EventPage, EventStore, RetryReset};
