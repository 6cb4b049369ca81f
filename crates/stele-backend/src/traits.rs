use std::fmt;

use async_trait::async_trait;
use stele_query::{CanonicalQuery, Cursor};
use stele_types::{Statement, StatementId};

use crate::error::BackendResult;

/// Outcome of a durable write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First physical write of this id.
    Written,
    /// An identical `(id, fingerprint)` pair was already present; nothing
    /// was written.
    Replayed,
}

impl WriteOutcome {
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed)
    }
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementPage {
    pub statements: Vec<Statement>,
    /// Token resuming after the last statement of this page; `None` is the
    /// explicit end-of-results marker.
    pub next: Option<Cursor>,
}

impl StatementPage {
    /// An empty, terminal page.
    pub fn empty() -> Self {
        Self {
            statements: Vec::new(),
            next: None,
        }
    }
}

/// Probe result for a backend engine.
///
/// Mirrors the classic heartbeat triple: fully serving, serving with a named
/// impairment, or not answering at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendHealth {
    Healthy,
    Degraded(String),
    Unreachable,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for BackendHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Storage integration contract.
///
/// All implementations must satisfy these invariants:
/// - Statements are immutable once written; there is no update or delete.
/// - `write` is durable at-least-once before returning success, safe to call
///   concurrently for distinct ids, and idempotent for a repeated identical
///   `(id, fingerprint)` pair — the repeat returns [`WriteOutcome::Replayed`]
///   rather than erroring or duplicating. A duplicate id with divergent
///   content is a `Conflict`.
/// - `query` honors `limit` exactly and its continuation cursor is
///   resumable: re-issuing the same filters with the returned cursor
///   continues deterministically from where the page ended, and no statement
///   is delivered twice within one paging session. An adapter that cannot
///   shield a session from concurrently written statements documents that
///   skew instead of violating the exactly-once rule.
/// - Adapters never interpret `include_voided`; void resolution and
///   filtering belong to the store.
/// - Transient engine failures surface as `Unavailable`, malformed input as
///   `BadRequest` — never swallowed, never conflated.
///
/// Each adapter owns its query translator: the pure mapping from
/// [`CanonicalQuery`] to the engine's native filter plan lives with the
/// adapter, so adding an engine never touches the store.
#[async_trait]
pub trait StatementBackend: Send + Sync {
    /// Durably persist one statement.
    async fn write(&self, statement: &Statement) -> BackendResult<WriteOutcome>;

    /// Fetch a statement by id. Absence is `Ok(None)`, not an error.
    async fn fetch_by_id(&self, id: StatementId) -> BackendResult<Option<Statement>>;

    /// Execute one page of a canonical query.
    async fn query(&self, query: &CanonicalQuery) -> BackendResult<StatementPage>;

    /// Probe the engine.
    async fn health(&self) -> BackendHealth;

    /// Engine name as registered (`"memory"`, `"fslog"`, ...).
    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn StatementBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementBackend")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_outcome_replay_flag() {
        assert!(WriteOutcome::Replayed.is_replay());
        assert!(!WriteOutcome::Written.is_replay());
    }

    #[test]
    fn empty_page_is_terminal() {
        let page = StatementPage::empty();
        assert!(page.statements.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn health_display() {
        assert_eq!(BackendHealth::Healthy.to_string(), "healthy");
        assert_eq!(
            BackendHealth::Degraded("index lag".into()).to_string(),
            "degraded: index lag"
        );
        assert_eq!(BackendHealth::Unreachable.to_string(), "unreachable");
        assert!(BackendHealth::Healthy.is_healthy());
        assert!(!BackendHealth::Unreachable.is_healthy());
    }
}
