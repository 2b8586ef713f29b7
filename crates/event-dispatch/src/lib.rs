//! # Event Dispatch
//!
//! Maps an outbox event's destination and type to the handler that performs
//! its side effect, and classifies handler failures as retryable or fatal.
//!
//! Delivery is at least once. A handler can see the same `event_id` more
//! than once and must treat repeats as no-ops downstream; see
//! [`EventHandler`] for the contract and [`IdempotentHandler`] for the
//! in-process part of it.
//!
//! ## Handlers
//!
//! - [`FnHandler`]: async closure over the raw [`Delivery`]
//! - [`TypedHandler`]: async closure over a JSON-decoded payload
//! - [`WebhookHandler`]: HTTP POST with the event id as idempotency key
//! - [`IdempotentHandler`]: wraps any handler with duplicate suppression

mod handler;
mod idempotency;
mod registry;
mod webhook;

pub use handler::{
    Delivery, EventHandler, FnHandler, HandlerError, HandlerFn, HandlerResult, TypedHandler,
};
pub use idempotency::{BeginResult, IdempotencyStore, IdempotentHandler};
pub use registry::{DispatchRegistry, Route, DEFAULT_DESTINATION};
pub use webhook::{classify_status, WebhookConfig, WebhookFormat, WebhookHandler};
