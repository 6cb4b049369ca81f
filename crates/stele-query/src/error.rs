use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while parsing or validating a query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown filter parameter: {0}")]
    UnknownParameter(String),

    #[error("duplicate filter parameter: {0}")]
    DuplicateParameter(String),

    #[error("empty value for '{0}'")]
    EmptyParameter(&'static str),

    #[error("invalid integer for '{field}': {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid boolean for '{field}': {value}")]
    InvalidFlag { field: &'static str, value: String },

    #[error("invalid instant for '{field}': {value}")]
    InvalidInstant { field: &'static str, value: String },

    #[error("limit must be positive, got {0}")]
    LimitNotPositive(i64),

    #[error("limit {requested} exceeds the maximum page size {max}")]
    LimitTooLarge { requested: usize, max: usize },

    #[error("malformed time range: since {since} is after until {until}")]
    InvalidRange {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },

    #[error("invalid agent filter: {0}")]
    InvalidAgent(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("cursor encoding failed: {0}")]
    CursorEncode(String),
}
