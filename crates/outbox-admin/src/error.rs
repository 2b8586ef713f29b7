use outbox_database::{DatabaseError, EventStatus};
use outbox_worker::WorkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Event {id} is {status}; only FAILED or DEAD_LETTER events can be retried")]
    InvalidState { id: String, status: EventStatus },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

pub type AdminResult<T> = Result<T, AdminError>;
