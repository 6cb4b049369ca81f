use thiserror::Error;

/// Errors produced by statement validation and type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("statement must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid statement id '{0}': not a UUID")]
    InvalidId(String),

    #[error("invalid timestamp '{0}': not an RFC 3339 instant")]
    InvalidTimestamp(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
