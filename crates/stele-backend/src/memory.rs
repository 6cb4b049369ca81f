use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stele_query::{CanonicalQuery, Cursor, SortOrder};
use stele_types::{Fingerprint, Statement, StatementId};

use crate::error::{BackendError, BackendResult};
use crate::traits::{BackendHealth, StatementBackend, StatementPage, WriteOutcome};

/// Cursor state minted by the in-memory translator: the sort key of the last
/// delivered statement.
#[derive(Debug, Serialize, Deserialize)]
struct MemoryCursor {
    s: i64,
    i: uuid::Uuid,
}

struct StoredRecord {
    statement: Statement,
    fingerprint: Fingerprint,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<StatementId, StoredRecord>,
    /// `stored`-time index; the key is (stored µs, id) so equal-time entries
    /// stay unique and totally ordered.
    order: BTreeMap<(i64, uuid::Uuid), StatementId>,
    /// Targets of voiding statements, maintained on write. An acceleration
    /// for void resolution; correctness never depends on it.
    void_index: HashSet<StatementId>,
}

/// Reference adapter backed by process memory.
///
/// The translator runs the canonical query as a keyset scan over the
/// `stored`-ordered index: the cursor names the last delivered sort key and
/// the next page resumes strictly past it. Sort keys are immutable, so a
/// paging session never sees the same statement twice; statements written
/// behind a descending cursor after the session started are skipped, which
/// is this adapter's documented skew.
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of statements held.
    pub fn len(&self) -> usize {
        self.state.read().expect("state lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the write-maintained void index.
    pub fn void_targets(&self) -> HashSet<StatementId> {
        self.state
            .read()
            .expect("state lock poisoned")
            .void_index
            .clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_key(statement: &Statement) -> (i64, uuid::Uuid) {
    (
        statement.stored.timestamp_micros(),
        *statement.id.as_uuid(),
    )
}

/// Native filter predicate for this engine.
fn matches(statement: &Statement, query: &CanonicalQuery) -> bool {
    if let Some(agent) = &query.agent {
        if !agent.matches(&statement.actor) {
            return false;
        }
    }
    if let Some(verb) = &query.verb {
        if statement.verb_iri() != Some(verb.as_str()) {
            return false;
        }
    }
    if let Some(activity) = &query.activity {
        if statement.object_iri() != Some(activity.as_str()) {
            return false;
        }
    }
    if let Some(since) = query.since {
        if statement.stored <= since {
            return false;
        }
    }
    if let Some(until) = query.until {
        if statement.stored > until {
            return false;
        }
    }
    true
}

fn collect_page<'a, I>(
    iter: I,
    state: &MemoryState,
    query: &CanonicalQuery,
) -> BackendResult<(Vec<Statement>, Option<Cursor>)>
where
    I: Iterator<Item = (&'a (i64, uuid::Uuid), &'a StatementId)>,
{
    let mut statements = Vec::new();
    let mut last_key: Option<(i64, uuid::Uuid)> = None;
    let mut next = None;

    for (key, id) in iter {
        let record = state
            .records
            .get(id)
            .ok_or_else(|| BackendError::Internal("order index out of sync".to_string()))?;
        if !matches(&record.statement, query) {
            continue;
        }
        if statements.len() == query.limit {
            // A further match exists past the full page; resume after the
            // last delivered key.
            let (s, i) = last_key
                .ok_or_else(|| BackendError::Internal("page cursor without a page".to_string()))?;
            next = Some(Cursor::from_state(&MemoryCursor { s, i })?);
            break;
        }
        statements.push(record.statement.clone());
        last_key = Some(*key);
    }

    Ok((statements, next))
}

impl InMemoryBackend {
    fn read_state(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| BackendError::Internal("state lock poisoned".to_string()))
    }

    fn write_state(&self) -> BackendResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| BackendError::Internal("state lock poisoned".to_string()))
    }
}

#[async_trait]
impl StatementBackend for InMemoryBackend {
    async fn write(&self, statement: &Statement) -> BackendResult<WriteOutcome> {
        let fingerprint = statement.fingerprint();
        let mut state = self.write_state()?;

        if let Some(existing) = state.records.get(&statement.id) {
            if existing.fingerprint == fingerprint {
                return Ok(WriteOutcome::Replayed);
            }
            return Err(BackendError::Conflict { id: statement.id });
        }

        state.order.insert(sort_key(statement), statement.id);
        if let Some(target) = statement.void_target() {
            state.void_index.insert(target);
        }
        state.records.insert(
            statement.id,
            StoredRecord {
                statement: statement.clone(),
                fingerprint,
            },
        );
        Ok(WriteOutcome::Written)
    }

    async fn fetch_by_id(&self, id: StatementId) -> BackendResult<Option<Statement>> {
        let state = self.read_state()?;
        Ok(state.records.get(&id).map(|r| r.statement.clone()))
    }

    async fn query(&self, query: &CanonicalQuery) -> BackendResult<StatementPage> {
        if query.limit == 0 {
            return Err(BackendError::BadRequest("limit must be positive".to_string()));
        }
        let after: Option<(i64, uuid::Uuid)> = match &query.cursor {
            Some(cursor) => {
                let state: MemoryCursor = cursor.decode_state()?;
                Some((state.s, state.i))
            }
            None => None,
        };

        let state = self.read_state()?;
        let (statements, next) = match query.order {
            SortOrder::Ascending => {
                let start = match after {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                collect_page(
                    state.order.range((start, Bound::Unbounded)),
                    &state,
                    query,
                )?
            }
            SortOrder::Descending => {
                let end = match after {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                collect_page(
                    state.order.range((Bound::Unbounded, end)).rev(),
                    &state,
                    query,
                )?
            }
        };

        Ok(StatementPage { statements, next })
    }

    async fn health(&self) -> BackendHealth {
        if self.state.read().is_err() {
            return BackendHealth::Degraded("state lock poisoned".to_string());
        }
        BackendHealth::Healthy
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use stele_query::{AgentFilter, QueryLimits};
    use stele_types::VOIDED_VERB_IRI;

    fn base_time() -> DateTime<Utc> {
        "2024-05-01T00:00:00Z".parse().unwrap()
    }

    fn authority() -> serde_json::Value {
        json!({ "objectType": "Agent", "account": { "homePage": "http://lrs.example", "name": "test" } })
    }

    /// A statement with deterministic id and stored time.
    fn stmt(n: u32, offset_secs: i64) -> Statement {
        let raw = json!({
            "id": format!("00000000-0000-4000-8000-{n:012}"),
            "actor": { "mbox": format!("mailto:learner{}@example.com", n % 3) },
            "verb": { "id": "http://adlnet.gov/expapi/verbs/completed" },
            "object": { "id": format!("http://example.com/course/{}", n % 2), "objectType": "Activity" }
        });
        Statement::canonicalize(raw, base_time() + Duration::seconds(offset_secs), authority())
            .unwrap()
    }

    fn voiding(n: u32, target: StatementId, offset_secs: i64) -> Statement {
        let raw = json!({
            "id": format!("00000000-0000-4000-9000-{n:012}"),
            "actor": { "mbox": "mailto:admin@example.com" },
            "verb": { "id": VOIDED_VERB_IRI },
            "object": { "objectType": "StatementRef", "id": target.to_string() }
        });
        Statement::canonicalize(raw, base_time() + Duration::seconds(offset_secs), authority())
            .unwrap()
    }

    fn query() -> CanonicalQuery {
        CanonicalQuery::unfiltered(&QueryLimits::default())
    }

    async fn seeded(count: u32) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        for n in 0..count {
            backend.write(&stmt(n, n as i64)).await.unwrap();
        }
        backend
    }

    /// Page through to the end, checking the per-page limit as we go.
    async fn drain(backend: &InMemoryBackend, mut query: CanonicalQuery) -> Vec<Statement> {
        let mut all = Vec::new();
        loop {
            let page = backend.query(&query).await.unwrap();
            assert!(page.statements.len() <= query.limit);
            all.extend(page.statements);
            match page.next {
                Some(cursor) => query.cursor = Some(cursor),
                None => return all,
            }
        }
    }

    // --- write / fetch ---

    #[tokio::test]
    async fn write_then_fetch_roundtrip() {
        let backend = InMemoryBackend::new();
        let statement = stmt(1, 0);
        assert_eq!(
            backend.write(&statement).await.unwrap(),
            WriteOutcome::Written
        );
        let fetched = backend.fetch_by_id(statement.id).await.unwrap().unwrap();
        assert_eq!(fetched, statement);
    }

    #[tokio::test]
    async fn fetch_missing_is_none() {
        let backend = InMemoryBackend::new();
        assert!(backend
            .fetch_by_id(StatementId::generate())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn identical_replay_is_a_noop() {
        let backend = InMemoryBackend::new();
        let statement = stmt(1, 0);
        backend.write(&statement).await.unwrap();

        // Same submission canonicalized at a later stored instant.
        let mut replay = statement.clone();
        replay.stored = replay.stored + Duration::seconds(30);
        replay.timestamp = replay.stored;

        assert_eq!(
            backend.write(&replay).await.unwrap(),
            WriteOutcome::Replayed
        );
        assert_eq!(backend.len(), 1);
        // The first write remains the record of truth.
        let fetched = backend.fetch_by_id(statement.id).await.unwrap().unwrap();
        assert_eq!(fetched.stored, statement.stored);
    }

    #[tokio::test]
    async fn divergent_content_conflicts() {
        let backend = InMemoryBackend::new();
        let statement = stmt(1, 0);
        backend.write(&statement).await.unwrap();

        let mut divergent = stmt(1, 0);
        divergent.verb = json!({ "id": "http://adlnet.gov/expapi/verbs/attempted" });

        let err = backend.write(&divergent).await.unwrap_err();
        assert_eq!(err, BackendError::Conflict { id: statement.id });
        let fetched = backend.fetch_by_id(statement.id).await.unwrap().unwrap();
        assert_eq!(fetched, statement);
    }

    #[tokio::test]
    async fn concurrent_distinct_writes_all_land() {
        let backend = Arc::new(InMemoryBackend::new());
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { backend.write(&stmt(n, n as i64)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(backend.len(), 16);
    }

    // --- pagination ---

    #[tokio::test]
    async fn pagination_visits_each_exactly_once_ascending() {
        let backend = seeded(10).await;
        let all = drain(&backend, query().with_limit(3).with_order(SortOrder::Ascending)).await;
        assert_eq!(all.len(), 10);
        let mut seen = HashSet::new();
        for window in all.windows(2) {
            assert!(window[0].stored <= window[1].stored);
        }
        for statement in &all {
            assert!(seen.insert(statement.id));
        }
    }

    #[tokio::test]
    async fn pagination_visits_each_exactly_once_descending() {
        let backend = seeded(10).await;
        let all = drain(&backend, query().with_limit(4)).await;
        assert_eq!(all.len(), 10);
        for window in all.windows(2) {
            assert!(window[0].stored >= window[1].stored);
        }
    }

    #[tokio::test]
    async fn exact_page_boundary_terminates_explicitly() {
        let backend = seeded(6).await;
        let page = backend.query(&query().with_limit(6)).await.unwrap();
        assert_eq!(page.statements.len(), 6);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn equal_stored_times_page_without_duplicates() {
        let backend = InMemoryBackend::new();
        for n in 0..5 {
            // All five share one stored instant; the id breaks the tie.
            backend.write(&stmt(n, 0)).await.unwrap();
        }
        let all = drain(&backend, query().with_limit(2)).await;
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn ascending_cursor_picks_up_later_writes() {
        let backend = seeded(4).await;
        let mut q = query().with_limit(3).with_order(SortOrder::Ascending);
        let first = backend.query(&q).await.unwrap();
        assert_eq!(first.statements.len(), 3);

        backend.write(&stmt(99, 60)).await.unwrap();

        q.cursor = first.next;
        let rest = drain(&backend, q).await;
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn descending_cursor_skips_later_writes_without_duplicates() {
        let backend = seeded(4).await;
        let mut q = query().with_limit(2);
        let first = backend.query(&q).await.unwrap();

        // Written after the session started; lands ahead of a descending
        // cursor and is skipped, never duplicated.
        backend.write(&stmt(99, 60)).await.unwrap();

        q.cursor = first.next;
        let rest = drain(&backend, q).await;
        let mut ids: Vec<_> = first.statements.iter().map(|s| s.id).collect();
        ids.extend(rest.iter().map(|s| s.id));
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn empty_corpus_is_terminal() {
        let backend = InMemoryBackend::new();
        let page = backend.query(&query()).await.unwrap();
        assert!(page.statements.is_empty());
        assert!(page.next.is_none());
    }

    // --- translation ---

    #[tokio::test]
    async fn verb_filter_matches_exact_iri() {
        let backend = seeded(4).await;
        backend
            .write(&voiding(0, stmt(1, 0).id, 100))
            .await
            .unwrap();

        let page = backend
            .query(&query().with_verb(VOIDED_VERB_IRI))
            .await
            .unwrap();
        assert_eq!(page.statements.len(), 1);
        assert!(page.statements[0].is_voiding());
    }

    #[tokio::test]
    async fn agent_filter_matches_actor_ifi() {
        let backend = seeded(6).await;
        let page = backend
            .query(&query().with_agent(AgentFilter::mbox("mailto:learner0@example.com")))
            .await
            .unwrap();
        assert_eq!(page.statements.len(), 2);
        for statement in &page.statements {
            assert_eq!(
                statement.actor["mbox"],
                json!("mailto:learner0@example.com")
            );
        }
    }

    #[tokio::test]
    async fn activity_filter_matches_object_id() {
        let backend = seeded(6).await;
        let page = backend
            .query(&query().with_activity("http://example.com/course/1"))
            .await
            .unwrap();
        assert_eq!(page.statements.len(), 3);
    }

    #[tokio::test]
    async fn since_is_exclusive_and_until_inclusive() {
        let backend = seeded(5).await;
        let mut q = query().with_order(SortOrder::Ascending);
        q.since = Some(base_time() + Duration::seconds(1));
        q.until = Some(base_time() + Duration::seconds(3));
        let page = backend.query(&q).await.unwrap();
        let offsets: Vec<i64> = page
            .statements
            .iter()
            .map(|s| (s.stored - base_time()).num_seconds())
            .collect();
        assert_eq!(offsets, vec![2, 3]);
    }

    #[tokio::test]
    async fn adapter_returns_voided_targets_regardless_of_flag() {
        // Void filtering belongs to the store; the translator ignores it.
        let backend = seeded(2).await;
        let target = stmt(0, 0).id;
        backend.write(&voiding(0, target, 50)).await.unwrap();

        let page = backend.query(&query()).await.unwrap();
        assert!(page.statements.iter().any(|s| s.id == target));
    }

    // --- cursors and errors ---

    #[tokio::test]
    async fn garbage_cursor_is_a_bad_request() {
        let backend = seeded(2).await;
        let mut q = query();
        q.cursor = Some(Cursor::from_token("0badc0de"));
        let err = backend.query(&q).await.unwrap_err();
        assert!(matches!(err, BackendError::BadRequest(_)));
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let backend = seeded(2).await;
        let err = backend.query(&query().with_limit(0)).await.unwrap_err();
        assert!(matches!(err, BackendError::BadRequest(_)));
    }

    // --- void index ---

    #[tokio::test]
    async fn void_index_tracks_targets() {
        let backend = seeded(3).await;
        let target = stmt(1, 1).id;
        assert!(backend.void_targets().is_empty());

        backend.write(&voiding(0, target, 10)).await.unwrap();
        let targets = backend.void_targets();
        assert_eq!(targets.len(), 1);
        assert!(targets.contains(&target));
    }

    // --- health ---

    #[tokio::test]
    async fn health_and_name() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.health().await, BackendHealth::Healthy);
        assert_eq!(backend.name(), "memory");
    }
}
