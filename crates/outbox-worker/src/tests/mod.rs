//! End-to-end worker tests against a real SQLite store.
//!
//! - `harness.rs`     - store setup, scripted downstream, helpers
//! - `delivery.rs`    - happy path, bounded concurrency, no event loss
//! - `dead_letter.rs` - retry ceiling, fatal errors, unknown event types
//! - `isolation.rs`   - panics, timeouts, store failures
//! - `stale.rs`       - recovery of events orphaned in PROCESSING
//! - `idempotency.rs` - redelivery against a deduplicating downstream
//! - `operations.rs`  - retry-all and cleanup scope

pub(crate) mod harness;
