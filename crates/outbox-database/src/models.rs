//! Event store model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Destination of events appended without an explicit one.
pub const DEFAULT_DESTINATION: &str = "default";

/// Lifecycle state of an [`IntegrationEvent`].
///
/// ```text
/// PENDING ──claim──▶ PROCESSING ──▶ COMPLETED
///    ▲                   │
///    └──── retry ◀───────┼──────────▶ DEAD_LETTER
///                        │
///          (stale sweep) ┘
/// ```
///
/// `FAILED` is never written by the worker; it is accepted by operator
/// retry alongside `DEAD_LETTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }

    /// No worker transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::DeadLetter)
    }

    /// States an operator retry may move back to PENDING.
    pub fn is_operator_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::DeadLetter)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    /// Case-insensitive; accepts `dead-letter` and `dead_letter` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "DEAD_LETTER" => Ok(Self::DeadLetter),
            _ => Err(format!("unknown event status: {}", s)),
        }
    }
}

/// One failed attempt, kept for operators after `last_error` is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub error: String,
}

/// A durable unit of side-effect work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    pub id: String,
    pub event_type: String,
    /// Which downstream system receives the event.
    pub destination: String,
    /// Opaque to the store and the worker; handlers decode it.
    pub payload: String,
    pub status: EventStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Only set while PENDING.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_history: Vec<ErrorRecord>,
    /// Token of the claim that owns the event. Only set while PROCESSING.
    pub claim_id: Option<String>,
    /// When the current attempt was claimed or last started. Only set while
    /// PROCESSING.
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Producer-side input to `append`.
#[derive(Debug, Clone)]
pub struct NewIntegrationEvent {
    pub event_type: String,
    pub destination: String,
    pub payload: String,
    pub max_retries: u32,
}

impl NewIntegrationEvent {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>, max_retries: u32) -> Self {
        Self {
            event_type: event_type.into(),
            destination: DEFAULT_DESTINATION.to_string(),
            payload: payload.into(),
            max_retries,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }
}

/// Outcome of a failed attempt, decided by the retry scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to PENDING, claimable again at `next_retry_at`.
    Retry { next_retry_at: DateTime<Utc> },
    /// Terminal.
    DeadLetter,
}

/// Events the stale sweep took back from a vanished attempt.
///
/// The orphaned attempt counts against `max_retries`, so an event that keeps
/// killing its worker ends up dead-lettered instead of cycling forever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleSweep {
    /// Back to PENDING, due immediately.
    pub requeued: Vec<String>,
    /// Attempt budget exhausted.
    pub dead_lettered: Vec<String>,
}

impl StaleSweep {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requeued.len() + self.dead_lettered.len()
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead_letter: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead_letter
    }

    pub fn get(&self, status: EventStatus) -> u64 {
        match status {
            EventStatus::Pending => self.pending,
            EventStatus::Processing => self.processing,
            EventStatus::Completed => self.completed,
            EventStatus::Failed => self.failed,
            EventStatus::DeadLetter => self.dead_letter,
        }
    }

    pub(crate) fn set(&mut self, status: EventStatus, count: u64) {
        match status {
            EventStatus::Pending => self.pending = count,
            EventStatus::Processing => self.processing = count,
            EventStatus::Completed => self.completed = count,
            EventStatus::Failed => self.failed = count,
            EventStatus::DeadLetter => self.dead_letter = count,
        }
    }
}
