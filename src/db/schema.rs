// src/db/schema.rs

//! Journal schema definitions and migrations

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the journal
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the journal up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current journal schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying journal migration to version {}", version);
        match version {
            1 => migrate_v1(conn)?,
            2 => migrate_v2(conn)?,
            _ => unreachable!("no migration for journal version {}", version),
        }
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// Initial schema - Version 1
///
/// - runs: one row per `apply` invocation
/// - steps: outcome of each plan step within a run
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_path TEXT,
            status TEXT NOT NULL CHECK(status IN ('running', 'succeeded', 'failed')),
            started_at TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE INDEX idx_runs_started_at ON runs(started_at);

        CREATE TABLE steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            resource TEXT NOT NULL,
            action TEXT,
            error TEXT,
            finished_at TEXT NOT NULL,
            UNIQUE(run_id, position),
            FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_steps_run_id ON steps(run_id);
        ",
    )?;
    Ok(())
}

/// Schema Version 2: domain schema digests recorded at database creation
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE schema_digests (
            database TEXT PRIMARY KEY,
            schema_path TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
