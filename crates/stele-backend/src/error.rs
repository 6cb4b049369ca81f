use serde::{Deserialize, Serialize};
use std::fmt;
use stele_query::QueryError;
use stele_types::StatementId;
use thiserror::Error;

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Wire-facing classification of a failure.
///
/// Every error surfaced to a caller resolves to exactly one kind; transport
/// layers map kinds to status codes and the forwarding engine uses them to
/// decide whether a retry can help.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Conflict,
    NotFound,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by backend adapters.
///
/// Adapters classify their own failures: they know whether an engine error
/// is a malformed request or a transient outage. The store passes these
/// through unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("statement {id} already exists with different content")]
    Conflict { id: StatementId },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("internal backend error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if a retry of the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<QueryError> for BackendError {
    fn from(err: QueryError) -> Self {
        match err {
            // Failing to mint a cursor is an adapter bug, not caller input.
            QueryError::CursorEncode(reason) => Self::Internal(reason),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
