use std::io;

use thiserror::Error;

/// Errors surfaced by scheduler operations.
///
/// Every public operation returns a `Result` with this error type; nothing
/// panics past the crate boundary. `NotFound` and `InvalidState` are ordinary
/// caller mistakes, `RevisionConflict` is retried internally and only escapes
/// after the retry budget is exhausted.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An operation was requested against a terminal or incompatible status.
    #[error("invalid state for {id}: {reason}")]
    InvalidState { id: String, reason: String },

    /// A malformed input payload that could not be degraded gracefully.
    #[error("validation error: {0}")]
    Validation(String),

    /// A concurrent writer updated the same document first.
    #[error("revision conflict on {id}: expected {expected}, found {found}")]
    RevisionConflict {
        id: String,
        expected: u64,
        found: u64,
    },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error on write.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SchedulerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidState {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
