use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Every failure the engine can report. Absence of tuples is never an error.
#[derive(Error, Debug)]
pub enum RebacError {
    #[error("Tuple store unavailable: {0}")]
    TupleStoreUnavailable(String),

    #[error("Corrupt tuple in store: {0}")]
    CorruptTuple(String),

    #[error("Maximum resolution depth of {max_depth} exceeded")]
    ResolutionDepthExceeded { max_depth: u32 },

    #[error("Relation '{relation}' is not defined for namespace '{namespace}'")]
    InvalidRelationReference { namespace: String, relation: String },

    #[error("Concurrent write conflict: {0}")]
    ConcurrentWriteConflict(String),

    #[error("Tuple budget of {limit} tuples per request exceeded")]
    ResourceLimitExceeded { limit: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification of [`RebacError`] for callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TupleStoreUnavailable,
    ResolutionDepthExceeded,
    InvalidRelationReference,
    ConcurrentWriteConflict,
    ResourceLimitExceeded,
    Cancelled,
    DeadlineExceeded,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TupleStoreUnavailable | ErrorKind::ConcurrentWriteConflict
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TupleStoreUnavailable => "tuple_store_unavailable",
            ErrorKind::ResolutionDepthExceeded => "resolution_depth_exceeded",
            ErrorKind::InvalidRelationReference => "invalid_relation_reference",
            ErrorKind::ConcurrentWriteConflict => "concurrent_write_conflict",
            ErrorKind::ResourceLimitExceeded => "resource_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RebacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RebacError::TupleStoreUnavailable(_) => ErrorKind::TupleStoreUnavailable,
            RebacError::ResolutionDepthExceeded { .. } => ErrorKind::ResolutionDepthExceeded,
            RebacError::InvalidRelationReference { .. } => ErrorKind::InvalidRelationReference,
            RebacError::ConcurrentWriteConflict(_) => ErrorKind::ConcurrentWriteConflict,
            RebacError::ResourceLimitExceeded { .. } => ErrorKind::ResourceLimitExceeded,
            RebacError::Cancelled => ErrorKind::Cancelled,
            RebacError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            RebacError::InvalidIdentifier { .. }
            | RebacError::InvalidTuple(_)
            | RebacError::Configuration(_) => ErrorKind::InvalidInput,
            RebacError::CorruptTuple(_) | RebacError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, RebacError>;
