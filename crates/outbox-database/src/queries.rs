//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` first, so it runs equally on a plain
//! connection or inside a `rusqlite::Transaction` (which derefs to one). That
//! is what lets producers append an event in the same transaction as their
//! own write.
//!
//! Every time-dependent query takes `now` from the caller.

use crate::{
    DatabaseError, DatabaseResult, ErrorRecord, EventStatus, FailureDisposition,
    IntegrationEvent, NewIntegrationEvent, StaleSweep, StatusCounts,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, event_type, destination, payload, status, retry_count, \
     max_retries, next_retry_at, last_error, error_history, claim_id, claimed_at, completed_at, \
     created_at, updated_at";

/// `last_error` written by the stale sweep.
pub const STALE_CLAIM_ERROR: &str = "claim expired before an outcome was recorded";

// ==========================================
// Producers
// ==========================================

/// Append a new PENDING event, due immediately.
pub fn append_event(
    conn: &Connection,
    event: &NewIntegrationEvent,
    now: DateTime<Utc>,
) -> DatabaseResult<IntegrationEvent> {
    if event.event_type.trim().is_empty() {
        return Err(DatabaseError::InvalidData("event_type must not be empty".to_string()));
    }
    if event.destination.trim().is_empty() {
        return Err(DatabaseError::InvalidData("destination must not be empty".to_string()));
    }
    if event.max_retries == 0 {
        return Err(DatabaseError::InvalidData("max_retries must be at least 1".to_string()));
    }

    let id = Uuid::new_v4().to_string();
    let now = format_timestamp(now);
    conn.execute(
        "INSERT INTO integration_events (id, event_type, destination, payload, status, retry_count, max_retries, next_retry_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'PENDING', 0, ?5, ?6, ?6, ?6)",
        params![id, event.event_type, event.destination, event.payload, event.max_retries, now],
    )?;
    debug!(
        event_id = %id,
        event_type = %event.event_type,
        destination = %event.destination,
        "Appended integration event"
    );

    get_event(conn, &id)?
        .ok_or_else(|| DatabaseError::NotFound(format!("event {} not found after insert", id)))
}

// ==========================================
// Worker
// ==========================================

/// Move up to `limit` due PENDING events to PROCESSING and return them.
///
/// One conditional `UPDATE … RETURNING`: the re-check of `status` in the
/// outer WHERE means a row another connection claimed first is skipped
/// rather than claimed twice. Every claimed row gets a fresh `claim_id`;
/// outcomes must present it, so a claim taken over by the stale sweep can
/// no longer write.
pub fn claim_due_batch(
    conn: &Connection,
    limit: usize,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<IntegrationEvent>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        "UPDATE integration_events
         SET status = 'PROCESSING', claim_id = ?3, claimed_at = ?1, next_retry_at = NULL, updated_at = ?1
         WHERE id IN (
             SELECT id FROM integration_events
             WHERE status = 'PENDING' AND next_retry_at <= ?1
             ORDER BY next_retry_at, created_at
             LIMIT ?2
         )
         AND status = 'PENDING'
         RETURNING {}",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut events = stmt
        .query_map(
            params![format_timestamp(now), sql_int(limit, "limit")?, Uuid::new_v4().to_string()],
            map_event,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    // RETURNING order is unspecified.
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(events)
}

/// Restart the staleness clock as the handler for a claimed event starts.
///
/// Events wait in the claimed batch until a concurrency slot frees up, so
/// the claim time alone says nothing about how long the handler has run.
/// Returns false if the claim is no longer held.
pub fn start_attempt(
    conn: &Connection,
    id: &str,
    claim_id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE integration_events
         SET claimed_at = ?3, updated_at = ?3
         WHERE id = ?1 AND claim_id = ?2 AND status = 'PROCESSING'",
        params![id, claim_id, format_timestamp(now)],
    )?;
    Ok(updated > 0)
}

/// PROCESSING → COMPLETED. Returns false if `claim_id` no longer holds the event.
pub fn record_success(
    conn: &Connection,
    id: &str,
    claim_id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE integration_events
         SET status = 'COMPLETED', completed_at = ?3, claim_id = NULL, claimed_at = NULL,
             next_retry_at = NULL, updated_at = ?3
         WHERE id = ?1 AND claim_id = ?2 AND status = 'PROCESSING'",
        params![id, claim_id, format_timestamp(now)],
    )?;
    Ok(updated > 0)
}

/// PROCESSING → PENDING (rescheduled) or DEAD_LETTER.
///
/// Always increments `retry_count`, overwrites `last_error`, and appends to
/// `error_history`. Returns false if `claim_id` no longer holds the event.
pub fn record_failure(
    conn: &Connection,
    id: &str,
    claim_id: &str,
    error: &str,
    disposition: FailureDisposition,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let (status, next_retry_at) = match disposition {
        FailureDisposition::Retry { next_retry_at } => {
            (EventStatus::Pending, Some(format_timestamp(next_retry_at)))
        }
        FailureDisposition::DeadLetter => (EventStatus::DeadLetter, None),
    };

    let updated = conn.execute(
        "UPDATE integration_events
         SET status = ?2,
             retry_count = retry_count + 1,
             last_error = ?3,
             next_retry_at = ?4,
             claim_id = NULL,
             claimed_at = NULL,
             updated_at = ?5,
             error_history = json_insert(error_history, '$[#]', json_object('at', ?5, 'error', ?3))
         WHERE id = ?1 AND claim_id = ?6 AND status = 'PROCESSING'",
        params![id, status.as_str(), error, next_retry_at, format_timestamp(now), claim_id],
    )?;
    Ok(updated > 0)
}

/// Take back PROCESSING events whose attempt started before `stale_before`.
///
/// The vanished attempt is counted like a failed one: `retry_count` goes up
/// and the error is logged. Events still within budget return to PENDING,
/// due at `now`; the rest are dead-lettered. Run it inside a transaction so
/// both halves see the same rows.
pub fn requeue_stale_processing(
    conn: &Connection,
    stale_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DatabaseResult<StaleSweep> {
    let stale_before = format_timestamp(stale_before);
    let now = format_timestamp(now);
    let params = params![stale_before, now, STALE_CLAIM_ERROR];

    let mut stmt = conn.prepare_cached(
        "UPDATE integration_events
         SET status = 'DEAD_LETTER',
             retry_count = retry_count + 1,
             next_retry_at = NULL,
             claim_id = NULL,
             claimed_at = NULL,
             last_error = ?3,
             updated_at = ?2,
             error_history = json_insert(error_history, '$[#]', json_object('at', ?2, 'error', ?3))
         WHERE status = 'PROCESSING' AND (claimed_at IS NULL OR claimed_at < ?1)
           AND retry_count + 1 >= max_retries
         RETURNING id",
    )?;
    let dead_lettered = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare_cached(
        "UPDATE integration_events
         SET status = 'PENDING',
             retry_count = retry_count + 1,
             next_retry_at = ?2,
             claim_id = NULL,
             claimed_at = NULL,
             last_error = ?3,
             updated_at = ?2,
             error_history = json_insert(error_history, '$[#]', json_object('at', ?2, 'error', ?3))
         WHERE status = 'PROCESSING' AND (claimed_at IS NULL OR claimed_at < ?1)
         RETURNING id",
    )?;
    let requeued = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StaleSweep {
        requeued,
        dead_lettered,
    })
}

// ==========================================
// Reads
// ==========================================

/// Get an event by ID.
pub fn get_event(conn: &Connection, id: &str) -> DatabaseResult<Option<IntegrationEvent>> {
    let sql = format!("SELECT {} FROM integration_events WHERE id = ?1", EVENT_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    match stmt.query_row(params![id], map_event) {
        Ok(event) => Ok(Some(event)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Page through events, most recent first, optionally filtered by status.
pub fn list_events(
    conn: &Connection,
    status: Option<EventStatus>,
    limit: usize,
    offset: usize,
) -> DatabaseResult<Vec<IntegrationEvent>> {
    let sql = format!(
        "SELECT {} FROM integration_events
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2 OFFSET ?3",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let events = stmt
        .query_map(
            params![
                status.map(|s| s.as_str()),
                sql_int(limit, "limit")?,
                sql_int(offset, "offset")?
            ],
            map_event,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Count events, optionally filtered by status.
pub fn count_events(conn: &Connection, status: Option<EventStatus>) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM integration_events WHERE (?1 IS NULL OR status = ?1)",
        params![status.map(|s| s.as_str())],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Count events in every status.
pub fn count_by_status(conn: &Connection) -> DatabaseResult<StatusCounts> {
    let mut stmt = conn
        .prepare_cached("SELECT status, COUNT(*) FROM integration_events GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        let status = status.parse::<EventStatus>().map_err(DatabaseError::InvalidData)?;
        counts.set(status, count as u64);
    }
    Ok(counts)
}

// ==========================================
// Operator actions
// ==========================================

/// FAILED/DEAD_LETTER → PENDING with a fresh attempt budget.
///
/// Returns false if the event is missing or in any other status.
/// `error_history` is kept.
pub fn reset_for_retry(conn: &Connection, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE integration_events
         SET status = 'PENDING', retry_count = 0, next_retry_at = ?2, last_error = NULL,
             claim_id = NULL, claimed_at = NULL, completed_at = NULL, updated_at = ?2
         WHERE id = ?1 AND status IN ('FAILED', 'DEAD_LETTER')",
        params![id, format_timestamp(now)],
    )?;
    Ok(updated > 0)
}

/// Reset every DEAD_LETTER event. Returns how many were reset.
pub fn reset_all_dead_letters(conn: &Connection, now: DateTime<Utc>) -> DatabaseResult<usize> {
    let updated = conn.execute(
        "UPDATE integration_events
         SET status = 'PENDING', retry_count = 0, next_retry_at = ?1, last_error = NULL,
             claim_id = NULL, claimed_at = NULL, completed_at = NULL, updated_at = ?1
         WHERE status = 'DEAD_LETTER'",
        params![format_timestamp(now)],
    )?;
    Ok(updated)
}

/// Delete terminal events that reached their terminal state before `cutoff`.
///
/// The terminal time is `completed_at`, falling back to `updated_at` for
/// statuses that never complete. PENDING and PROCESSING are rejected.
pub fn purge_older_than(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    statuses: &[EventStatus],
) -> DatabaseResult<usize> {
    if let Some(status) = statuses.iter().find(|s| !s.is_terminal()) {
        return Err(DatabaseError::InvalidData(format!(
            "refusing to purge non-terminal status {}",
            status
        )));
    }

    let cutoff = format_timestamp(cutoff);
    let mut stmt = conn.prepare_cached(
        "DELETE FROM integration_events
         WHERE status = ?1 AND COALESCE(completed_at, updated_at) < ?2",
    )?;
    let mut deleted = 0;
    for status in statuses {
        deleted += stmt.execute(params![status.as_str(), cutoff])?;
    }
    Ok(deleted)
}

// ==========================================
// Row mapping
// ==========================================

/// Fixed-width UTC timestamp; lexicographic order matches time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// SQLite integers are signed 64-bit.
fn sql_int(value: usize, name: &str) -> DatabaseResult<i64> {
    i64::try_from(value)
        .map_err(|_| DatabaseError::InvalidData(format!("{} {} is out of range", name, value)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, format!("{}: {}", raw, e)))
}

fn opt_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, format!("{}: {}", raw, e))),
        None => Ok(None),
    }
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<IntegrationEvent> {
    let status: String = row.get(4)?;
    let history: String = row.get(9)?;

    Ok(IntegrationEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        destination: row.get(2)?,
        payload: row.get(3)?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        retry_count: row.get(5)?,
        max_retries: row.get(6)?,
        next_retry_at: opt_timestamp_at(row, 7)?,
        last_error: row.get(8)?,
        error_history: serde_json::from_str::<Vec<ErrorRecord>>(&history)
            .map_err(|e| conversion_error(9, e.to_string()))?,
        claim_id: row.get(10)?,
        claimed_at: opt_timestamp_at(row, 11)?,
        completed_at: opt_timestamp_at(row, 12)?,
        created_at: timestamp_at(row, 13)?,
        updated_at: timestamp_at(row, 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn append(conn: &Connection, event_type: &str, at: DateTime<Utc>) -> IntegrationEvent {
        append_event(conn, &NewIntegrationEvent::new(event_type, "{}", 3), at).unwrap()
    }

    /// Claim the next due event and return its claim token.
    fn claim_one(conn: &Connection, at: DateTime<Utc>) -> String {
        let claimed = claim_due_batch(conn, 1, at).unwrap();
        assert_eq!(claimed.len(), 1, "nothing due at {}", at);
        claimed[0].claim_id.clone().unwrap()
    }

    fn set_status(conn: &Connection, id: &str, status: EventStatus) {
        conn.execute(
            "UPDATE integration_events SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )
        .unwrap();
    }

    #[test]
    fn test_append_creates_due_pending_event() {
        let conn = setup();
        let event = append_event(
            &conn,
            &NewIntegrationEvent::new("reservation.updated", r#"{"reservationId":42}"#, 5),
            t0(),
        )
        .unwrap();

        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.max_retries, 5);
        assert_eq!(event.next_retry_at, Some(t0()));
        assert_eq!(event.payload, r#"{"reservationId":42}"#);
        assert_eq!(event.destination, crate::DEFAULT_DESTINATION);
        assert!(event.last_error.is_none());
        assert!(event.error_history.is_empty());
        assert_eq!(event.created_at, t0());
    }

    #[test]
    fn test_append_rejects_invalid_input() {
        let conn = setup();
        assert!(append_event(&conn, &NewIntegrationEvent::new(" ", "{}", 3), t0()).is_err());
        assert!(append_event(&conn, &NewIntegrationEvent::new("x", "{}", 0), t0()).is_err());
        let blank = NewIntegrationEvent::new("x", "{}", 3).with_destination("");
        assert!(append_event(&conn, &blank, t0()).is_err());
    }

    #[test]
    fn test_append_keeps_destination() {
        let conn = setup();
        let new = NewIntegrationEvent::new("guest.checked_in", "{}", 3).with_destination("TELEGRAM");
        let event = append_event(&conn, &new, t0()).unwrap();
        assert_eq!(event.destination, "TELEGRAM");
        assert_eq!(get_event(&conn, &event.id).unwrap().unwrap().destination, "TELEGRAM");
    }

    #[test]
    fn test_append_rolls_back_with_business_write() {
        let mut conn = setup();
        conn.execute_batch("CREATE TABLE reservations (id INTEGER PRIMARY KEY, guest TEXT NOT NULL)")
            .unwrap();

        {
            let tx = conn.transaction().unwrap();
            tx.execute("INSERT INTO reservations (guest) VALUES ('Ada')", []).unwrap();
            append(&tx, "reservation.updated", t0());
            // Dropped without commit.
        }
        let reservations: i64 = conn
            .query_row("SELECT COUNT(*) FROM reservations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(reservations, 0);
        assert_eq!(count_events(&conn, None).unwrap(), 0);

        let tx = conn.transaction().unwrap();
        tx.execute("INSERT INTO reservations (guest) VALUES ('Grace')", []).unwrap();
        append(&tx, "reservation.updated", t0());
        tx.commit().unwrap();
        assert_eq!(count_events(&conn, None).unwrap(), 1);
    }

    #[test]
    fn test_claim_takes_only_due_pending_events() {
        let conn = setup();
        let due = append(&conn, "a", t0());
        let future = append(&conn, "b", t0() + Duration::minutes(10));
        let done = append(&conn, "c", t0());
        set_status(&conn, &done.id, EventStatus::Completed);

        let claimed = claim_due_batch(&conn, 10, t0() + Duration::seconds(1)).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].status, EventStatus::Processing);
        assert_eq!(claimed[0].claimed_at, Some(t0() + Duration::seconds(1)));
        assert!(claimed[0].claim_id.is_some());
        assert!(claimed[0].next_retry_at.is_none());

        let untouched = get_event(&conn, &future.id).unwrap().unwrap();
        assert_eq!(untouched.status, EventStatus::Pending);
    }

    #[test]
    fn test_claim_respects_limit_and_never_reclaims() {
        let conn = setup();
        for i in 0..5 {
            append(&conn, "a", t0() + Duration::milliseconds(i));
        }

        let first = claim_due_batch(&conn, 3, t0() + Duration::seconds(1)).unwrap();
        let second = claim_due_batch(&conn, 3, t0() + Duration::seconds(1)).unwrap();
        let third = claim_due_batch(&conn, 3, t0() + Duration::seconds(1)).unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(third.is_empty());
        assert!(first.iter().all(|a| second.iter().all(|b| a.id != b.id)));
        assert_ne!(first[0].claim_id, second[0].claim_id);
        assert!(claim_due_batch(&conn, 0, t0()).unwrap().is_empty());
    }

    #[test]
    fn test_record_success_requires_processing() {
        let conn = setup();
        let event = append(&conn, "a", t0());

        assert!(!record_success(&conn, &event.id, "no-claim", t0()).unwrap());

        let claim = claim_one(&conn, t0());
        assert!(record_success(&conn, &event.id, &claim, t0() + Duration::seconds(2)).unwrap());

        let done = get_event(&conn, &event.id).unwrap().unwrap();
        assert_eq!(done.status, EventStatus::Completed);
        assert_eq!(done.completed_at, Some(t0() + Duration::seconds(2)));
        assert!(done.claimed_at.is_none());
        assert!(done.claim_id.is_none());
        assert!(done.next_retry_at.is_none());

        // Terminal: a second report changes nothing.
        assert!(!record_success(&conn, &event.id, &claim, t0()).unwrap());
    }

    #[test]
    fn test_record_failure_reschedules_and_logs_history() {
        let conn = setup();
        let event = append(&conn, "a", t0());
        let claim = claim_one(&conn, t0());

        let retry_at = t0() + Duration::seconds(4);
        assert!(record_failure(
            &conn,
            &event.id,
            &claim,
            "HTTP 503",
            FailureDisposition::Retry { next_retry_at: retry_at },
            t0() + Duration::seconds(1),
        )
        .unwrap());

        let pending = get_event(&conn, &event.id).unwrap().unwrap();
        assert_eq!(pending.status, EventStatus::Pending);
        assert_eq!(pending.retry_count, 1);
        assert_eq!(pending.next_retry_at, Some(retry_at));
        assert_eq!(pending.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(
            pending.error_history,
            vec![ErrorRecord { at: t0() + Duration::seconds(1), error: "HTTP 503".into() }]
        );

        // Not due yet.
        assert!(claim_due_batch(&conn, 1, t0() + Duration::seconds(3)).unwrap().is_empty());
        let claim = claim_one(&conn, retry_at);
        record_failure(&conn, &event.id, &claim, "HTTP 400", FailureDisposition::DeadLetter, retry_at)
            .unwrap();

        let dead = get_event(&conn, &event.id).unwrap().unwrap();
        assert_eq!(dead.status, EventStatus::DeadLetter);
        assert_eq!(dead.retry_count, 2);
        assert!(dead.next_retry_at.is_none());
        assert_eq!(dead.error_history.len(), 2);
        assert_eq!(dead.error_history[1].error, "HTTP 400");
    }

    #[test]
    fn test_record_failure_ignores_non_processing() {
        let conn = setup();
        let event = append(&conn, "a", t0());
        assert!(!record_failure(&conn, &event.id, "c", "x", FailureDisposition::DeadLetter, t0())
            .unwrap());
        assert_eq!(get_event(&conn, &event.id).unwrap().unwrap().retry_count, 0);
    }

    #[test]
    fn test_superseded_claim_cannot_record() {
        let conn = setup();
        let event = append(&conn, "a", t0());
        let first = claim_one(&conn, t0());

        // The sweep takes the event back and another run claims it.
        let later = t0() + Duration::minutes(10);
        requeue_stale_processing(&conn, later - Duration::minutes(5), later).unwrap();
        let second = claim_one(&conn, later);
        assert_ne!(first, second);

        assert!(!start_attempt(&conn, &event.id, &first, later).unwrap());
        assert!(!record_success(&conn, &event.id, &first, later).unwrap());
        assert!(!record_failure(&conn, &event.id, &first, "late", FailureDisposition::DeadLetter, later)
            .unwrap());

        let held = get_event(&conn, &event.id).unwrap().unwrap();
        assert_eq!(held.status, EventStatus::Processing);
        assert_eq!(held.retry_count, 1);
        assert_eq!(held.claim_id.as_deref(), Some(second.as_str()));

        assert!(record_success(&conn, &event.id, &second, later).unwrap());
    }

    #[test]
    fn test_start_attempt_restarts_staleness_clock() {
        let conn = setup();
        let event = append(&conn, "a", t0());
        let claim = claim_one(&conn, t0());

        // Queued behind other handlers for eight minutes before starting.
        let started = t0() + Duration::minutes(8);
        assert!(start_attempt(&conn, &event.id, &claim, started).unwrap());
        assert_eq!(get_event(&conn, &event.id).unwrap().unwrap().claimed_at, Some(started));

        let now = t0() + Duration::minutes(10);
        let swept = requeue_stale_processing(&conn, now - Duration::minutes(5), now).unwrap();
        assert!(swept.is_empty());
        assert!(record_success(&conn, &event.id, &claim, now).unwrap());
    }

    #[test]
    fn test_list_is_most_recent_first_with_filter_and_paging() {
        let conn = setup();
        let ids: Vec<String> = (0..5)
            .map(|i| append(&conn, "a", t0() + Duration::seconds(i)).id)
            .collect();
        set_status(&conn, &ids[1], EventStatus::DeadLetter);
        set_status(&conn, &ids[3], EventStatus::DeadLetter);

        let page: Vec<String> = list_events(&conn, None, 2, 0)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(page, vec![ids[4].clone(), ids[3].clone()]);

        let page: Vec<String> = list_events(&conn, None, 2, 4)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(page, vec![ids[0].clone()]);

        let dead: Vec<String> = list_events(&conn, Some(EventStatus::DeadLetter), 10, 0)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(dead, vec![ids[3].clone(), ids[1].clone()]);
        assert_eq!(count_events(&conn, Some(EventStatus::DeadLetter)).unwrap(), 2);
        assert_eq!(count_events(&conn, None).unwrap(), 5);
    }

    #[test]
    fn test_same_timestamp_ties_break_by_insertion() {
        let conn = setup();
        let first = append(&conn, "a", t0());
        let second = append(&conn, "a", t0());

        let listed = list_events(&conn, None, 10, 0).unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn test_count_by_status() {
        let conn = setup();
        let a = append(&conn, "a", t0());
        append(&conn, "a", t0());
        let c = append(&conn, "a", t0());
        set_status(&conn, &a.id, EventStatus::DeadLetter);
        set_status(&conn, &c.id, EventStatus::Failed);

        let counts = count_by_status(&conn).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.dead_letter, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_reset_for_retry_only_from_failed_or_dead_letter() {
        let conn = setup();
        let event = append(&conn, "a", t0());
        let claim = claim_one(&conn, t0());
        record_failure(&conn, &event.id, &claim, "boom", FailureDisposition::DeadLetter, t0())
            .unwrap();

        let later = t0() + Duration::hours(1);
        assert!(reset_for_retry(&conn, &event.id, later).unwrap());

        let reset = get_event(&conn, &event.id).unwrap().unwrap();
        assert_eq!(reset.status, EventStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert!(reset.last_error.is_none());
        assert_eq!(reset.next_retry_at, Some(later));
        assert_eq!(reset.error_history.len(), 1);

        // Now PENDING: a second reset is rejected.
        assert!(!reset_for_retry(&conn, &event.id, later).unwrap());
        assert!(!reset_for_retry(&conn, "missing", later).unwrap());

        set_status(&conn, &event.id, EventStatus::Failed);
        assert!(reset_for_retry(&conn, &event.id, later).unwrap());
    }

    #[test]
    fn test_reset_all_dead_letters_touches_only_dead_letters() {
        let conn = setup();
        let mut dead = Vec::new();
        for _ in 0..5 {
            let e = append(&conn, "a", t0());
            set_status(&conn, &e.id, EventStatus::DeadLetter);
            conn.execute(
                "UPDATE integration_events SET retry_count = 3, last_error = 'x' WHERE id = ?1",
                params![e.id],
            )
            .unwrap();
            dead.push(e.id);
        }
        let pending: Vec<String> = (0..2).map(|_| append(&conn, "a", t0()).id).collect();
        let failed = append(&conn, "a", t0());
        set_status(&conn, &failed.id, EventStatus::Failed);

        assert_eq!(reset_all_dead_letters(&conn, t0()).unwrap(), 5);

        for id in &dead {
            let e = get_event(&conn, id).unwrap().unwrap();
            assert_eq!(e.status, EventStatus::Pending);
            assert_eq!(e.retry_count, 0);
            assert!(e.last_error.is_none());
        }
        for id in &pending {
            assert_eq!(get_event(&conn, id).unwrap().unwrap().status, EventStatus::Pending);
        }
        assert_eq!(get_event(&conn, &failed.id).unwrap().unwrap().status, EventStatus::Failed);
    }

    #[test]
    fn test_purge_removes_only_old_events_of_given_status() {
        let conn = setup();
        let old = t0() - Duration::days(45);

        let old_done = append(&conn, "a", old);
        let claim = claim_one(&conn, old);
        record_success(&conn, &old_done.id, &claim, old).unwrap();

        let recent_done = append(&conn, "a", t0());
        let claim = claim_one(&conn, t0());
        record_success(&conn, &recent_done.id, &claim, t0()).unwrap();

        let old_dead = append(&conn, "a", old);
        set_status(&conn, &old_dead.id, EventStatus::DeadLetter);
        let old_pending = append(&conn, "a", old);
        let old_processing = append(&conn, "a", old);
        set_status(&conn, &old_processing.id, EventStatus::Processing);

        let cutoff = t0() - Duration::days(30);
        assert_eq!(purge_older_than(&conn, cutoff, &[EventStatus::Completed]).unwrap(), 1);

        assert!(get_event(&conn, &old_done.id).unwrap().is_none());
        assert!(get_event(&conn, &recent_done.id).unwrap().is_some());
        assert!(get_event(&conn, &old_dead.id).unwrap().is_some());
        assert!(get_event(&conn, &old_pending.id).unwrap().is_some());
        assert!(get_event(&conn, &old_processing.id).unwrap().is_some());

        assert_eq!(purge_older_than(&conn, cutoff, &[EventStatus::DeadLetter]).unwrap(), 1);
        assert!(purge_older_than(&conn, cutoff, &[EventStatus::Pending]).is_err());
        assert_eq!(purge_older_than(&conn, cutoff, &[]).unwrap(), 0);
    }

    #[test]
    fn test_requeue_stale_processing() {
        let conn = setup();
        let stale = append(&conn, "a", t0());
        claim_due_batch(&conn, 1, t0()).unwrap();
        let fresh = append(&conn, "a", t0());
        claim_due_batch(&conn, 1, t0() + Duration::minutes(9)).unwrap();

        let now = t0() + Duration::minutes(10);
        let swept = requeue_stale_processing(&conn, now - Duration::minutes(5), now).unwrap();
        assert_eq!(swept.requeued, vec![stale.id.clone()]);
        assert!(swept.dead_lettered.is_empty());

        let event = get_event(&conn, &stale.id).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 1);
        assert_eq!(event.next_retry_at, Some(now));
        assert!(event.claimed_at.is_none());
        assert!(event.claim_id.is_none());
        assert_eq!(event.last_error.as_deref(), Some(STALE_CLAIM_ERROR));
        assert_eq!(event.error_history.len(), 1);

        assert_eq!(
            get_event(&conn, &fresh.id).unwrap().unwrap().status,
            EventStatus::Processing
        );
    }

    #[test]
    fn test_repeated_stale_claims_exhaust_the_budget() {
        let conn = setup();
        let event = append(&conn, "a", t0());

        // max_retries = 3: two requeues, then dead letter.
        let mut at = t0();
        for round in 1..=3 {
            claim_one(&conn, at);
            at += Duration::minutes(10);
            let swept = requeue_stale_processing(&conn, at - Duration::minutes(5), at).unwrap();
            let stored = get_event(&conn, &event.id).unwrap().unwrap();
            assert_eq!(stored.retry_count, round);
            if round < 3 {
                assert_eq!(swept.requeued, vec![event.id.clone()]);
                assert_eq!(stored.status, EventStatus::Pending);
            } else {
                assert_eq!(swept.dead_lettered, vec![event.id.clone()]);
                assert!(swept.requeued.is_empty());
                assert_eq!(stored.status, EventStatus::DeadLetter);
                assert!(stored.next_retry_at.is_none());
                assert_eq!(stored.error_history.len(), 3);
            }
        }
    }

    #[test]
    fn test_list_rejects_offset_beyond_sqlite_range() {
        let conn = setup();
        append(&conn, "a", t0());

        assert!(matches!(
            list_events(&conn, None, 10, usize::MAX),
            Err(DatabaseError::InvalidData(_))
        ));
        assert!(list_events(&conn, None, 10, i64::MAX as usize).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_format_is_sortable() {
        let a = format_timestamp(t0());
        let b = format_timestamp(t0() + Duration::milliseconds(5));
        assert_eq!(a, "2026-01-15T10:00:00.000Z");
        assert!(a < b);
        assert_eq!(parse_timestamp(&b).unwrap(), t0() + Duration::milliseconds(5));
    }
}
