use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use stele_backend::{BackendHealth, StatementBackend, StatementPage, WriteOutcome};
use stele_query::{CanonicalQuery, QueryLimits, SortOrder};
use stele_types::{Authority, Principal, Statement, StatementId, StoredClock, VOIDED_VERB_IRI};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::forward::ForwardSink;

/// Outcome of a single accepted submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestReceipt {
    /// The statement's resolved id, server-generated when the submission
    /// carried none.
    pub id: StatementId,
    pub outcome: WriteOutcome,
}

/// The statement store orchestrator.
///
/// Owns the write path end to end: every inbound statement passes through
/// validation, canonicalization, the dedup check, and the adapter write, in
/// that order. `stored` and `authority` are assigned here and nowhere else.
/// Queries pass through to the active adapter; voided-statement resolution
/// happens here, on top of whatever page the adapter returns.
pub struct StatementStore {
    backend: Arc<dyn StatementBackend>,
    authority: Authority,
    limits: QueryLimits,
    clock: StoredClock,
    sink: Option<Arc<dyn ForwardSink>>,
}

impl StatementStore {
    pub fn new(
        backend: Arc<dyn StatementBackend>,
        authority: Authority,
        limits: QueryLimits,
    ) -> Self {
        Self {
            backend,
            authority,
            limits,
            clock: StoredClock::new(),
            sink: None,
        }
    }

    /// Attach the forwarding engine's intake.
    pub fn with_forwarding(mut self, sink: Arc<dyn ForwardSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate, canonicalize, dedup-check, and write one raw submission.
    ///
    /// A resubmission with an id already held and identical content resolves
    /// as an idempotent replay without a second physical write; the same id
    /// with divergent content is a conflict and leaves the stored record
    /// untouched.
    pub async fn ingest(&self, raw: Value, principal: &Principal) -> StoreResult<IngestReceipt> {
        let stored = self.clock.now();
        let authority = principal
            .agent
            .clone()
            .unwrap_or_else(|| self.authority.agent());
        let statement = Statement::canonicalize(raw, stored, authority)?;

        // Racing writers may both observe "absent" here; the adapter's write
        // contract settles that race.
        if let Some(existing) = self.backend.fetch_by_id(statement.id).await? {
            if existing.fingerprint() == statement.fingerprint() {
                debug!(id = %statement.id, "idempotent replay");
                return Ok(IngestReceipt {
                    id: statement.id,
                    outcome: WriteOutcome::Replayed,
                });
            }
            return Err(StoreError::Conflict { id: statement.id });
        }

        let outcome = self.backend.write(&statement).await?;
        if outcome == WriteOutcome::Written {
            self.hand_to_forwarder(&statement);
        }
        debug!(id = %statement.id, replay = outcome.is_replay(), "statement ingested");
        Ok(IngestReceipt {
            id: statement.id,
            outcome,
        })
    }

    /// Ingest a batch in submission order.
    ///
    /// Each statement resolves independently; a failure never blocks the
    /// statements after it. A duplicate id within one batch resolves through
    /// the same dedup check as any other resubmission.
    pub async fn ingest_batch(
        &self,
        raws: Vec<Value>,
        principal: &Principal,
    ) -> Vec<StoreResult<IngestReceipt>> {
        let mut results = Vec::with_capacity(raws.len());
        for raw in raws {
            results.push(self.ingest(raw, principal).await);
        }

        let written = results
            .iter()
            .filter(|r| matches!(r, Ok(receipt) if receipt.outcome == WriteOutcome::Written))
            .count();
        let replayed = results
            .iter()
            .filter(|r| matches!(r, Ok(receipt) if receipt.outcome == WriteOutcome::Replayed))
            .count();
        info!(
            written,
            replayed,
            failed = results.len() - written - replayed,
            "statement batch ingested"
        );
        results
    }

    /// Fetch a statement as stored, without void resolution.
    pub async fn get(&self, id: StatementId) -> StoreResult<Statement> {
        self.backend
            .fetch_by_id(id)
            .await?
            .ok_or(StoreError::NotFound { id })
    }

    /// Fetch a statement with its derived `voided` flag resolved.
    pub async fn get_with_void_status(&self, id: StatementId) -> StoreResult<Statement> {
        let mut statement = self.get(id).await?;
        statement.voided = self.voided_ids().await?.contains(&id);
        Ok(statement)
    }

    /// Run a query and resolve voided statements on the returned page.
    ///
    /// The adapter's cursor passes through untouched: client-side void
    /// filtering never alters pagination progress, so a page may carry fewer
    /// than `limit` statements and still have a continuation.
    pub async fn query(&self, query: &CanonicalQuery) -> StoreResult<StatementPage> {
        let mut page = self.backend.query(query).await?;
        if page.statements.is_empty() {
            return Ok(page);
        }

        let voided = self.voided_ids().await?;
        if query.include_voided {
            for statement in &mut page.statements {
                statement.voided = voided.contains(&statement.id);
            }
        } else {
            page.statements.retain(|s| !voided.contains(&s.id));
        }
        Ok(page)
    }

    /// The set of statement ids targeted by any stored voiding statement.
    ///
    /// This is the lazy resolution path: a keyset scan over voiding
    /// statements, paged at the configured ceiling. Resolution is
    /// order-independent — a voiding statement ingested before its target
    /// still voids it. Adapter-side void indexes are optimizations and must
    /// agree with this scan.
    pub async fn voided_ids(&self) -> StoreResult<HashSet<StatementId>> {
        let mut scan = CanonicalQuery::unfiltered(&self.limits)
            .with_verb(VOIDED_VERB_IRI)
            .with_order(SortOrder::Ascending)
            .with_limit(self.limits.max_page_size);

        let mut voided = HashSet::new();
        loop {
            let page = self.backend.query(&scan).await?;
            for statement in &page.statements {
                if let Some(target) = statement.void_target() {
                    voided.insert(target);
                }
            }
            match page.next {
                Some(cursor) => scan.cursor = Some(cursor),
                None => break,
            }
        }
        Ok(voided)
    }

    /// Active adapter liveness, for the heartbeat surface.
    pub async fn health(&self) -> BackendHealth {
        self.backend.health().await
    }

    fn hand_to_forwarder(&self, statement: &Statement) {
        let Some(sink) = &self.sink else { return };
        if let Err(err) = sink.forward(statement.clone()) {
            warn!(id = %statement.id, error = %err, "statement stored but not forwarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardIntakeError;
    use serde_json::json;
    use std::sync::Mutex;
    use stele_backend::{ErrorKind, FsLogBackend, InMemoryBackend};
    use tempfile::TempDir;

    fn raw(n: u32) -> Value {
        json!({
            "id": format!("00000000-0000-4000-8000-{n:012}"),
            "actor": { "mbox": format!("mailto:learner{n}@example.com") },
            "verb": { "id": "http://adlnet.gov/expapi/verbs/completed" },
            "object": { "id": "http://example.com/course/rust", "objectType": "Activity" }
        })
    }

    fn voiding_raw(target: StatementId) -> Value {
        json!({
            "actor": { "mbox": "mailto:admin@example.com" },
            "verb": { "id": VOIDED_VERB_IRI },
            "object": { "objectType": "StatementRef", "id": target.to_string() }
        })
    }

    fn memory_fixture() -> (Arc<InMemoryBackend>, StatementStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = StatementStore::new(
            backend.clone(),
            Authority::default(),
            QueryLimits::default(),
        );
        (backend, store)
    }

    fn principal() -> Principal {
        Principal::named("tester")
    }

    fn unfiltered() -> CanonicalQuery {
        CanonicalQuery::unfiltered(&QueryLimits::default())
    }

    async fn drain(store: &StatementStore, mut query: CanonicalQuery) -> Vec<Statement> {
        let mut all = Vec::new();
        loop {
            let page = store.query(&query).await.unwrap();
            all.extend(page.statements);
            match page.next {
                Some(cursor) => query.cursor = Some(cursor),
                None => return all,
            }
        }
    }

    // --- ingestion ---

    #[tokio::test]
    async fn ingest_assigns_an_id_when_missing() {
        let (_, store) = memory_fixture();
        let submission = json!({
            "actor": { "mbox": "mailto:a@example.com" },
            "verb": { "id": "http://adlnet.gov/expapi/verbs/attempted" },
            "object": { "id": "http://example.com/course/intro" }
        });

        let receipt = store.ingest(submission, &principal()).await.unwrap();
        assert_eq!(receipt.outcome, WriteOutcome::Written);

        let stored = store.get(receipt.id).await.unwrap();
        assert_eq!(stored.id, receipt.id);
        assert_eq!(stored.timestamp, stored.stored);
        assert_eq!(stored.authority, Authority::default().agent());
    }

    #[tokio::test]
    async fn client_supplied_id_is_kept() {
        let (_, store) = memory_fixture();
        let receipt = store.ingest(raw(7), &principal()).await.unwrap();
        assert_eq!(receipt.id.to_string(), "00000000-0000-4000-8000-000000000007");
    }

    #[tokio::test]
    async fn principal_agent_becomes_the_authority() {
        let (_, store) = memory_fixture();
        let agent = json!({
            "objectType": "Agent",
            "account": { "homePage": "http://idp.example.com", "name": "svc" }
        });
        let principal = Principal::named("svc").with_agent(agent.clone());

        let receipt = store.ingest(raw(1), &principal).await.unwrap();
        let stored = store.get(receipt.id).await.unwrap();
        assert_eq!(stored.authority, agent);
    }

    #[tokio::test]
    async fn identical_resubmission_is_a_replay() {
        let (backend, store) = memory_fixture();
        let first = store.ingest(raw(1), &principal()).await.unwrap();
        let second = store.ingest(raw(1), &principal()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.outcome, WriteOutcome::Replayed);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn divergent_resubmission_conflicts() {
        let (_, store) = memory_fixture();
        let receipt = store.ingest(raw(1), &principal()).await.unwrap();

        let mut divergent = raw(1);
        divergent["result"] = json!({ "success": false });
        let err = store.ingest(divergent, &principal()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let stored = store.get(receipt.id).await.unwrap();
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn malformed_submission_is_rejected_before_the_backend() {
        let (backend, store) = memory_fixture();
        let err = store
            .ingest(json!("not a statement"), &principal())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = store
            .ingest(json!({ "verb": {}, "object": {} }), &principal())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn batch_failures_do_not_block_later_statements() {
        let (backend, store) = memory_fixture();
        let mut conflicting = raw(1);
        conflicting["result"] = json!({ "success": true });

        let results = store
            .ingest_batch(
                vec![raw(1), json!(42), conflicting, raw(2)],
                &principal(),
            )
            .await;

        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::BadRequest);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::Conflict);
        assert!(results[3].is_ok());
        assert_eq!(backend.len(), 2);
    }

    // --- void resolution ---

    #[tokio::test]
    async fn default_query_hides_voided_statements() {
        let (_, store) = memory_fixture();
        let a = store.ingest(raw(1), &principal()).await.unwrap().id;
        let b = store.ingest(raw(2), &principal()).await.unwrap().id;
        let voider = store
            .ingest(voiding_raw(a), &principal())
            .await
            .unwrap()
            .id;

        let page = store.query(&unfiltered()).await.unwrap();
        let ids: Vec<StatementId> = page.statements.iter().map(|s| s.id).collect();
        assert!(!ids.contains(&a));
        assert!(ids.contains(&b));
        assert!(ids.contains(&voider));
    }

    #[tokio::test]
    async fn voided_inclusion_flags_the_statement() {
        let (_, store) = memory_fixture();
        let a = store.ingest(raw(1), &principal()).await.unwrap().id;
        let b = store.ingest(raw(2), &principal()).await.unwrap().id;
        store.ingest(voiding_raw(a), &principal()).await.unwrap();

        let mut query = unfiltered();
        query.include_voided = true;
        let page = store.query(&query).await.unwrap();

        let flagged: Vec<(StatementId, bool)> =
            page.statements.iter().map(|s| (s.id, s.voided)).collect();
        assert!(flagged.contains(&(a, true)));
        assert!(flagged.contains(&(b, false)));
    }

    #[tokio::test]
    async fn void_filtering_leaves_pagination_intact() {
        let (_, store) = memory_fixture();
        let mut base = Vec::new();
        for n in 0..8 {
            base.push(store.ingest(raw(n), &principal()).await.unwrap().id);
        }
        for target in base.iter().take(3) {
            store.ingest(voiding_raw(*target), &principal()).await.unwrap();
        }

        // 11 records, 3 of them voided: 8 visible.
        let all = drain(
            &store,
            unfiltered().with_limit(4).with_order(SortOrder::Ascending),
        )
        .await;
        assert_eq!(all.len(), 8);

        let ids: HashSet<StatementId> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 8, "no duplicate delivery");
        for target in base.iter().take(3) {
            assert!(!ids.contains(target));
        }
        for survivor in base.iter().skip(3) {
            assert!(ids.contains(survivor));
        }
    }

    #[tokio::test]
    async fn get_with_void_status_resolves_the_flag() {
        let (_, store) = memory_fixture();
        let a = store.ingest(raw(1), &principal()).await.unwrap().id;
        let b = store.ingest(raw(2), &principal()).await.unwrap().id;
        store.ingest(voiding_raw(a), &principal()).await.unwrap();

        assert!(store.get_with_void_status(a).await.unwrap().voided);
        assert!(!store.get_with_void_status(b).await.unwrap().voided);

        let missing = StatementId::generate();
        let err = store.get_with_void_status(missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn scan_matches_the_memory_void_index() {
        let (backend, store) = memory_fixture();
        let a = store.ingest(raw(1), &principal()).await.unwrap().id;
        store.ingest(raw(2), &principal()).await.unwrap();
        store.ingest(voiding_raw(a), &principal()).await.unwrap();
        // A dangling target and a repeat void resolve the same way on both
        // paths.
        let dangling = StatementId::generate();
        store.ingest(voiding_raw(dangling), &principal()).await.unwrap();
        store
            .ingest(
                json!({
                    "actor": { "mbox": "mailto:other@example.com" },
                    "verb": { "id": VOIDED_VERB_IRI },
                    "object": { "objectType": "StatementRef", "id": a.to_string() }
                }),
                &principal(),
            )
            .await
            .unwrap();

        assert_eq!(store.voided_ids().await.unwrap(), backend.void_targets());
    }

    #[tokio::test]
    async fn both_adapters_agree_on_the_voided_set() {
        let (_, memory_store) = memory_fixture();
        let dir = TempDir::new().unwrap();
        let fslog = Arc::new(FsLogBackend::open(&dir.path().join("s.log"), false).unwrap());
        let fslog_store = StatementStore::new(
            fslog,
            Authority::default(),
            QueryLimits::default(),
        );

        let a = StatementId::parse("00000000-0000-4000-8000-000000000001").unwrap();
        for store in [&memory_store, &fslog_store] {
            for n in 0..4 {
                store.ingest(raw(n), &principal()).await.unwrap();
            }
            store.ingest(voiding_raw(a), &principal()).await.unwrap();
        }

        assert_eq!(
            memory_store.voided_ids().await.unwrap(),
            fslog_store.voided_ids().await.unwrap()
        );

        let memory_ids: HashSet<StatementId> = drain(&memory_store, unfiltered())
            .await
            .iter()
            .map(|s| s.id)
            .collect();
        let fslog_ids: HashSet<StatementId> = drain(&fslog_store, unfiltered())
            .await
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(memory_ids, fslog_ids);
    }

    // --- forwarding seam ---

    struct RecordingSink(Mutex<Vec<StatementId>>);

    impl ForwardSink for RecordingSink {
        fn forward(&self, statement: Statement) -> Result<(), ForwardIntakeError> {
            self.0.lock().unwrap().push(statement.id);
            Ok(())
        }
    }

    struct RejectingSink;

    impl ForwardSink for RejectingSink {
        fn forward(&self, _statement: Statement) -> Result<(), ForwardIntakeError> {
            Err(ForwardIntakeError("intake closed".to_string()))
        }
    }

    #[tokio::test]
    async fn written_statements_reach_the_sink_replays_do_not() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let backend = Arc::new(InMemoryBackend::new());
        let store = StatementStore::new(
            backend,
            Authority::default(),
            QueryLimits::default(),
        )
        .with_forwarding(sink.clone());

        let first = store.ingest(raw(1), &principal()).await.unwrap();
        store.ingest(raw(1), &principal()).await.unwrap();
        let second = store.ingest(raw(2), &principal()).await.unwrap();

        let forwarded = sink.0.lock().unwrap().clone();
        assert_eq!(forwarded, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn sink_rejection_never_fails_the_ingest() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = StatementStore::new(
            backend.clone(),
            Authority::default(),
            QueryLimits::default(),
        )
        .with_forwarding(Arc::new(RejectingSink));

        let receipt = store.ingest(raw(1), &principal()).await.unwrap();
        assert_eq!(receipt.outcome, WriteOutcome::Written);
        assert_eq!(backend.len(), 1);
    }
}
