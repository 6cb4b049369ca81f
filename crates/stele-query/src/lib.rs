//! Canonical query model for the Stele LRS.
//!
//! A [`CanonicalQuery`] describes a statement search independently of any
//! storage engine: filters, page limit, ordering, and an opaque continuation
//! [`Cursor`]. Adapters translate it into their native query plans; this
//! crate owns only the shape and its validation.
//!
//! Two construction paths funnel through the same validation: the wire
//! parser ([`CanonicalQuery::parse`]) used at the HTTP boundary, and the
//! typed builder used by in-process callers.

pub mod agent;
pub mod cursor;
pub mod error;
pub mod query;

pub use agent::AgentFilter;
pub use cursor::Cursor;
pub use error::QueryError;
pub use query::{CanonicalQuery, QueryLimits, SortOrder};
