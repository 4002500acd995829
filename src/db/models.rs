// src/db/models.rs

//! Journal records
//!
//! Rust structs that correspond to journal tables, with methods for
//! creating, reading and updating rows.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Fixed-width UTC timestamp, so text ordering matches time ordering
fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Lifecycle of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// One invocation of `apply`
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Option<i64>,
    pub config_path: Option<String>,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl Run {
    /// Create a new running Run
    pub fn new(config_path: Option<String>) -> Self {
        Self {
            id: None,
            config_path,
            status: RunStatus::Running,
            started_at: now(),
            finished_at: None,
        }
    }

    /// Insert this run into the journal
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO runs (config_path, status, started_at) VALUES (?1, ?2, ?3)",
            params![&self.config_path, self.status.as_str(), &self.started_at],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Mark the run finished with `status`
    pub fn finish(&mut self, conn: &Connection, status: RunStatus) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::Journal("Cannot finish a run without ID".to_string()))?;
        let finished_at = now();

        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), &finished_at, id],
        )?;

        self.status = status;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Find a run by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, config_path, status, started_at, finished_at FROM runs WHERE id = ?1",
        )?;

        let run = stmt.query_row([id], Self::from_row).optional()?;

        Ok(run)
    }

    /// List all runs, most recent first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, config_path, status, started_at, finished_at
             FROM runs ORDER BY started_at DESC, id DESC",
        )?;

        let runs = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(2)?;
        let status = status_str.parse::<RunStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            config_path: row.get(1)?,
            status,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
        })
    }
}

/// Outcome of one plan step; exactly one of `action` and `error` is set
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub id: Option<i64>,
    pub run_id: i64,
    pub position: i64,
    pub resource: String,
    pub action: Option<String>,
    pub error: Option<String>,
    pub finished_at: String,
}

impl StepRecord {
    pub fn succeeded(run_id: i64, position: i64, resource: String, action: &str) -> Self {
        Self {
            id: None,
            run_id,
            position,
            resource,
            action: Some(action.to_string()),
            error: None,
            finished_at: now(),
        }
    }

    pub fn failed(run_id: i64, position: i64, resource: String, error: String) -> Self {
        Self {
            id: None,
            run_id,
            position,
            resource,
            action: None,
            error: Some(error),
            finished_at: now(),
        }
    }

    /// Insert this step into the journal
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO steps (run_id, position, resource, action, error, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.run_id,
                &self.position,
                &self.resource,
                &self.action,
                &self.error,
                &self.finished_at,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// All steps of a run in plan order
    pub fn find_by_run(conn: &Connection, run_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, run_id, position, resource, action, error, finished_at
             FROM steps WHERE run_id = ?1 ORDER BY position",
        )?;

        let steps = stmt
            .query_map([run_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(steps)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            run_id: row.get(1)?,
            position: row.get(2)?,
            resource: row.get(3)?,
            action: row.get(4)?,
            error: row.get(5)?,
            finished_at: row.get(6)?,
        })
    }
}

/// Digest of a domain schema file when its database was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDigest {
    pub database: String,
    pub schema_path: String,
    pub sha256: String,
    pub recorded_at: String,
}

impl SchemaDigest {
    pub fn new(database: String, schema_path: String, sha256: String) -> Self {
        Self {
            database,
            schema_path,
            sha256,
            recorded_at: now(),
        }
    }

    /// Insert or replace the digest for this database
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO schema_digests (database, schema_path, sha256, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(database) DO UPDATE SET
                 schema_path = excluded.schema_path,
                 sha256 = excluded.sha256,
                 recorded_at = excluded.recorded_at",
            params![&self.database, &self.schema_path, &self.sha256, &self.recorded_at],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, database: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT database, schema_path, sha256, recorded_at
             FROM schema_digests WHERE database = ?1",
        )?;

        let digest = stmt
            .query_row([database], |row| {
                Ok(Self {
                    database: row.get(0)?,
                    schema_path: row.get(1)?,
                    sha256: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            })
            .optional()?;

        Ok(digest)
    }
}
