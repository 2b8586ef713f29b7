use outbox_database::DatabaseError;
use thiserror::Error;

/// Failure of a whole worker invocation.
///
/// Per-event handler failures never show up here; they are recorded on the
/// event. Only the store failing aborts a run.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Event store error: {0}")]
    Store(#[from] DatabaseError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
