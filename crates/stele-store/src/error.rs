use stele_backend::{BackendError, ErrorKind};
use stele_types::{StatementId, TypeError};
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the statement store.
///
/// Backend failures pass through with the adapter's own classification; the
/// store adds only what it decides itself: validation rejections, its own
/// dedup conflicts, and missing-statement lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid statement: {0}")]
    Statement(#[from] TypeError),

    #[error("statement {id} already exists with different content")]
    Conflict { id: StatementId },

    #[error("statement {id} not found")]
    NotFound { id: StatementId },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Statement(_) => ErrorKind::BadRequest,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Backend(err) => err.kind(),
        }
    }
}
