//! Error types for Syncpoint.

use thiserror::Error;

use crate::types::{RestorePhase, SystemId};

/// Result type alias for Syncpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Syncpoint.
#[derive(Error, Debug)]
pub enum Error {
    /// Subsystem could not be queried. Retriable.
    #[error("subsystem unavailable: {0}")]
    AdapterUnavailable(String),

    /// Listing output could not be normalized. Requires operator fix.
    #[error("parse error: {0}")]
    Parse(String),

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal group status change. Caller bug.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A record violates a formation invariant. Caller bug.
    #[error("validation error: {0}")]
    Validation(String),

    /// A restore pipeline step failed on one system. Surfaced per system;
    /// sibling systems in a parallel run are unaffected.
    #[error("restore step failed on {system_id} at {phase}: {reason}")]
    StepFailure {
        system_id: SystemId,
        phase: RestorePhase,
        reason: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
