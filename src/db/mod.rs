// src/db/mod.rs

//! Run journal
//!
//! An SQLite record of every provisioning run: which steps ran, what each
//! did, and the digest of each domain schema at the time its database was
//! created. The journal is an audit trail only. Convergence decisions are
//! always re-derived by probing the host; nothing here is consulted to
//! decide whether a step should run.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Default journal location
pub const DEFAULT_JOURNAL_PATH: &str = "/var/lib/wavedeploy/journal.db";

/// Open the journal at `db_path`, creating it and its schema if needed
///
/// This is idempotent - calling it on an existing journal is safe.
pub fn init(db_path: &str) -> Result<Connection> {
    debug!("Initializing journal at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Journal ready at {}", db_path);
    Ok(conn)
}

/// Open an existing journal
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::JournalNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    Ok(conn)
}
