// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Core error types for wavedeploy
#[derive(Error, Debug)]
pub enum Error {
    /// The process could not be spawned at all
    #[error("Failed to execute `{command}`: {source}")]
    Execution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process outlived its allotted time and was killed
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// A mutating command exited nonzero
    #[error("`{command}` exited with status {exit_code}{}", format_stderr(.stderr))]
    ConvergeFailure {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The package manager cannot install from the requested source
    #[error("{manager} cannot install {package} from {source_kind}")]
    UnsupportedSource {
        manager: &'static str,
        package: String,
        source_kind: &'static str,
    },

    /// The password hashing helper produced no usable hash
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// Invalid deployment configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Journal database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Journal not found
    #[error("Journal not found at path: {0}")]
    JournalNotFound(String),

    /// Journal records used out of order
    #[error("Journal error: {0}")]
    Journal(String),

    /// A plan step failed; the run stops here
    #[error("Step {position} ({resource}) failed: {source}")]
    StepFailed {
        position: usize,
        resource: String,
        #[source]
        source: Box<Error>,
    },
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Result type alias using wavedeploy's Error type
pub type Result<T> = std::result::Result<T, Error>;
