//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table. Each
//! one commits together with its `migrations` row or not at all, so a
//! failure partway leaves the schema at the previous version.
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with
//! millisecond precision, so text comparison matches time order.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

type Migration = fn(&Connection) -> DatabaseResult<()>;

const MIGRATIONS: [(i32, &str, Migration); 3] = [
    (1, "integration_events", migrate_v1_integration_events),
    (2, "claim_and_history", migrate_v2_claim_and_history),
    (3, "destination_and_claim_token", migrate_v3_destination_and_claim_token),
];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    for (version, name, migrate) in MIGRATIONS {
        if current_version < version {
            apply_migration(conn, version, name, migrate)?;
        }
    }

    info!("Migrations complete");
    Ok(())
}

fn apply_migration(
    conn: &Connection,
    version: i32,
    name: &str,
    migrate: Migration,
) -> DatabaseResult<()> {
    info!(version, name, "Applying migration");
    let tx = conn.unchecked_transaction()?;
    migrate(&tx)?;
    record_migration(&tx, version, name)?;
    tx.commit()?;
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the outbox table and its claim index.
fn migrate_v1_integration_events(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS integration_events (
            id TEXT PRIMARY KEY NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'PROCESSING', 'COMPLETED', 'FAILED', 'DEAD_LETTER')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            next_retry_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_integration_events_due
            ON integration_events(status, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_integration_events_created_at
            ON integration_events(created_at);
        ",
    )?;
    Ok(())
}

/// V2: claim tracking for the stale sweep, completion time for retention,
/// and a per-attempt error log.
fn migrate_v2_claim_and_history(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE integration_events ADD COLUMN claimed_at TEXT;
        ALTER TABLE integration_events ADD COLUMN completed_at TEXT;
        ALTER TABLE integration_events ADD COLUMN error_history TEXT NOT NULL DEFAULT '[]';

        CREATE INDEX IF NOT EXISTS idx_integration_events_claimed_at
            ON integration_events(status, claimed_at);
        ",
    )?;
    Ok(())
}

/// V3: named destinations, and the token that ties an outcome to the claim
/// that produced it.
fn migrate_v3_destination_and_claim_token(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE integration_events ADD COLUMN destination TEXT NOT NULL DEFAULT 'default';
        ALTER TABLE integration_events ADD COLUMN claim_id TEXT;
        ",
    )?;
    Ok(())
}
