use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stele_query::{CanonicalQuery, Cursor, SortOrder};
use stele_types::{Fingerprint, Statement, StatementId};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::traits::{BackendHealth, StatementBackend, StatementPage, WriteOutcome};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Upper bound on a single framed record.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

/// One framed log entry.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-serialized LogRecord)]
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    seq: u64,
    statement: Statement,
}

/// Cursor state minted by this translator: the sort key of the last
/// delivered statement. `seq` is the append ordinal, which breaks
/// equal-`stored` ties deterministically.
#[derive(Debug, Serialize, Deserialize)]
struct LogCursor {
    s: i64,
    q: u64,
}

struct LogWriter {
    writer: BufWriter<File>,
    offset: u64,
}

struct IndexedRecord {
    statement: Statement,
    fingerprint: Fingerprint,
    seq: u64,
}

#[derive(Default)]
struct LogIndex {
    records: HashMap<StatementId, IndexedRecord>,
    /// `stored`-time index keyed by (stored µs, seq).
    order: BTreeMap<(i64, u64), StatementId>,
    next_seq: u64,
}

/// Reference adapter backed by an append-only record log.
///
/// Statements are framed with a length prefix and CRC32 and appended to a
/// single file; the read path is an in-memory index rebuilt on open. Opening
/// scans the file front-to-back and truncates at the first invalid frame, so
/// the surviving log is always a clean prefix — a torn tail from a crash is
/// dropped, never served.
///
/// The translator mirrors the in-memory adapter's keyset scan with the same
/// skew property: statements appended behind a descending cursor after the
/// session started are skipped, never duplicated.
pub struct FsLogBackend {
    path: PathBuf,
    sync_writes: bool,
    writer: Mutex<LogWriter>,
    index: RwLock<LogIndex>,
}

impl FsLogBackend {
    /// Open (or create) the log at `path`, recovering any existing records.
    ///
    /// With `sync_writes`, every append is fsynced before the write call
    /// returns; otherwise durability rides on the OS page cache.
    pub fn open(path: &Path, sync_writes: bool) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (index, valid_len) = Self::recover(path)?;

        let file_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if valid_len < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            warn!(
                path = %path.display(),
                dropped = file_len - valid_len,
                "truncated torn log tail"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let writer = LogWriter {
            writer: BufWriter::new(file),
            offset: valid_len,
        };

        debug!(
            path = %path.display(),
            records = index.records.len(),
            "statement log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            sync_writes,
            writer: Mutex::new(writer),
            index: RwLock::new(index),
        })
    }

    /// Scan the log front-to-back, stopping at the first invalid frame.
    ///
    /// Returns the rebuilt index and the byte length of the valid prefix.
    fn recover(path: &Path) -> BackendResult<(LogIndex, u64)> {
        let mut index = LogIndex::default();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((index, 0)),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            let mut header = [0u8; HEADER_SIZE];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0
                || length > MAX_RECORD_BYTES
                || offset + HEADER_SIZE as u64 + length as u64 > file_len
            {
                warn!(offset, length, "invalid frame length; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated frame; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != expected_crc {
                warn!(offset, "frame CRC mismatch; stopping recovery");
                break;
            }

            let record: LogRecord = match serde_json::from_slice(&payload) {
                Ok(record) => record,
                Err(e) => {
                    warn!(offset, error = %e, "undecodable frame; stopping recovery");
                    break;
                }
            };

            let id = record.statement.id;
            if index.records.contains_key(&id) {
                // A duplicate id can only come from outside interference;
                // the first record stays the record of truth.
                warn!(offset, %id, "duplicate statement id in log; keeping first");
            } else {
                index.next_seq = index.next_seq.max(record.seq + 1);
                index.order.insert(
                    (record.statement.stored.timestamp_micros(), record.seq),
                    id,
                );
                index.records.insert(
                    id,
                    IndexedRecord {
                        fingerprint: record.statement.fingerprint(),
                        seq: record.seq,
                        statement: record.statement,
                    },
                );
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        Ok((index, offset))
    }

    /// Number of statements held.
    pub fn len(&self) -> usize {
        self.index.read().expect("index lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_index(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, LogIndex>> {
        self.index
            .read()
            .map_err(|_| BackendError::Internal("index lock poisoned".to_string()))
    }
}

fn collect_page<'a, I>(
    iter: I,
    index: &LogIndex,
    query: &CanonicalQuery,
) -> BackendResult<(Vec<Statement>, Option<Cursor>)>
where
    I: Iterator<Item = (&'a (i64, u64), &'a StatementId)>,
{
    let mut statements = Vec::new();
    let mut last_key: Option<(i64, u64)> = None;
    let mut next = None;

    for (key, id) in iter {
        let record = index
            .records
            .get(id)
            .ok_or_else(|| BackendError::Internal("order index out of sync".to_string()))?;
        if !matches(&record.statement, query) {
            continue;
        }
        if statements.len() == query.limit {
            let (s, q) = last_key
                .ok_or_else(|| BackendError::Internal("page cursor without a page".to_string()))?;
            next = Some(Cursor::from_state(&LogCursor { s, q })?);
            break;
        }
        statements.push(record.statement.clone());
        last_key = Some(*key);
    }

    Ok((statements, next))
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

#[async_trait]
impl StatementBackend for FsLogBackend {
    async fn write(&self, statement: &Statement) -> BackendResult<WriteOutcome> {
        let fingerprint = statement.fingerprint();

        // The writer mutex serializes dedup-check plus append, so two racing
        // writes of one id cannot both pass the check.
        let mut w = self
            .writer
            .lock()
            .map_err(|_| BackendError::Internal("writer lock poisoned".to_string()))?;

        let seq = {
            let index = self.read_index()?;
            if let Some(existing) = index.records.get(&statement.id) {
                if existing.fingerprint == fingerprint {
                    return Ok(WriteOutcome::Replayed);
                }
                return Err(BackendError::Conflict { id: statement.id });
            }
            index.next_seq
        };

        let record = LogRecord {
            seq,
            statement: statement.clone(),
        };
        let payload =
            serde_json::to_vec(&record).map_err(|e| BackendError::Internal(e.to_string()))?;
        if payload.len() as u64 > MAX_RECORD_BYTES as u64 {
            return Err(BackendError::BadRequest(format!(
                "statement exceeds the {MAX_RECORD_BYTES}-byte frame limit"
            )));
        }

        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);
        let entry_offset = w.offset;

        w.writer.write_all(&length.to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        if self.sync_writes {
            w.writer.get_ref().sync_data()?;
        }
        w.offset += HEADER_SIZE as u64 + payload.len() as u64;

        let mut index = self
            .index
            .write()
            .map_err(|_| BackendError::Internal("index lock poisoned".to_string()))?;
        index.order.insert(
            (record.statement.stored.timestamp_micros(), seq),
            statement.id,
        );
        index.records.insert(
            statement.id,
            IndexedRecord {
                statement: record.statement,
                fingerprint,
                seq,
            },
        );
        index.next_seq = seq + 1;

        debug!(offset = entry_offset, len = payload.len(), seq, "log append");
        Ok(WriteOutcome::Written)
    }

    async fn fetch_by_id(&self, id: StatementId) -> BackendResult<Option<Statement>> {
        let index = self.read_index()?;
        Ok(index.records.get(&id).map(|r| r.statement.clone()))
    }

    async fn query(&self, query: &CanonicalQuery) -> BackendResult<StatementPage> {
        if query.limit == 0 {
            return Err(BackendError::BadRequest("limit must be positive".to_string()));
        }
        let after: Option<(i64, u64)> = match &query.cursor {
            Some(cursor) => {
                let state: LogCursor = cursor.decode_state()?;
                Some((state.s, state.q))
            }
            None => None,
        };

        let index = self.read_index()?;
        let (statements, next) = match query.order {
            SortOrder::Ascending => {
                let start = match after {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                collect_page(index.order.range((start, Bound::Unbounded)), &index, query)?
            }
            SortOrder::Descending => {
                let end = match after {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                collect_page(
                    index.order.range((Bound::Unbounded, end)).rev(),
                    &index,
                    query,
                )?
            }
        };

        Ok(StatementPage { statements, next })
    }

    async fn health(&self) -> BackendHealth {
        if fs::metadata(&self.path).is_err() {
            return BackendHealth::Unreachable;
        }
        if self.writer.lock().is_err() || self.index.read().is_err() {
            return BackendHealth::Degraded("lock poisoned".to_string());
        }
        BackendHealth::Healthy
    }

    fn name(&self) -> &'static str {
        "fslog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;
    use std::collections::HashSet;
    use stele_query::QueryLimits;
    use stele_types::VOIDED_VERB_IRI;
    use tempfile::TempDir;

    fn base_time() -> DateTime<Utc> {
        "2024-05-01T00:00:00Z".parse().unwrap()
    }

    fn authority() -> serde_json::Value {
        json!({ "objectType": "Agent", "account": { "homePage": "http://lrs.example", "name": "test" } })
    }

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

    fn query() -> CanonicalQuery {
        CanonicalQuery::unfiltered(&QueryLimits::default())
    }

    fn log_path(dir: &TempDir) -> PathBuf {
        dir.path().join("statements.log")
    }

    async fn drain(backend: &FsLogBackend, mut query: CanonicalQuery) -> Vec<Statement> {
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

    // --- basic contract ---

    #[tokio::test]
    async fn write_then_fetch_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        let statement = stmt(1, 0);
        assert_eq!(
            backend.write(&statement).await.unwrap(),
            WriteOutcome::Written
        );
        let fetched = backend.fetch_by_id(statement.id).await.unwrap().unwrap();
        assert_eq!(fetched, statement);
    }

    #[tokio::test]
    async fn identical_replay_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        let statement = stmt(1, 0);
        backend.write(&statement).await.unwrap();
        assert_eq!(
            backend.write(&statement).await.unwrap(),
            WriteOutcome::Replayed
        );
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn divergent_content_conflicts() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        let statement = stmt(1, 0);
        backend.write(&statement).await.unwrap();

        let mut divergent = stmt(1, 0);
        divergent.verb = json!({ "id": VOIDED_VERB_IRI });
        // Not a valid voiding shape, but the adapter only compares content.
        let err = backend.write(&divergent).await.unwrap_err();
        assert_eq!(err, BackendError::Conflict { id: statement.id });
        assert_eq!(backend.len(), 1);
    }

    // --- durability and recovery ---

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let backend = FsLogBackend::open(&path, false).unwrap();
            for n in 0..5 {
                backend.write(&stmt(n, n as i64)).await.unwrap();
            }
        }

        let backend = FsLogBackend::open(&path, false).unwrap();
        assert_eq!(backend.len(), 5);
        let fetched = backend.fetch_by_id(stmt(3, 3).id).await.unwrap().unwrap();
        assert_eq!(fetched, stmt(3, 3));
    }

    #[tokio::test]
    async fn replay_detection_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let backend = FsLogBackend::open(&path, false).unwrap();
            backend.write(&stmt(1, 0)).await.unwrap();
        }

        let backend = FsLogBackend::open(&path, false).unwrap();
        assert_eq!(
            backend.write(&stmt(1, 0)).await.unwrap(),
            WriteOutcome::Replayed
        );
        let mut divergent = stmt(1, 0);
        divergent.result = Some(json!({ "success": true }));
        assert!(matches!(
            backend.write(&divergent).await.unwrap_err(),
            BackendError::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn torn_tail_is_truncated_and_log_stays_writable() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let backend = FsLogBackend::open(&path, false).unwrap();
            for n in 0..3 {
                backend.write(&stmt(n, n as i64)).await.unwrap();
            }
        }
        let intact_len = fs::metadata(&path).unwrap().len();

        // A crash mid-append leaves a header that promises more bytes than
        // the file holds.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&500u32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let backend = FsLogBackend::open(&path, false).unwrap();
        assert_eq!(backend.len(), 3);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        backend.write(&stmt(9, 9)).await.unwrap();
        drop(backend);
        let backend = FsLogBackend::open(&path, false).unwrap();
        assert_eq!(backend.len(), 4);
    }

    #[tokio::test]
    async fn corrupt_frame_drops_the_rest_of_the_log() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let backend = FsLogBackend::open(&path, false).unwrap();
            for n in 0..3 {
                backend.write(&stmt(n, n as i64)).await.unwrap();
            }
        }

        // Flip one payload byte inside the second frame.
        let mut bytes = fs::read(&path).unwrap();
        let first_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let second_payload_start = HEADER_SIZE + first_len + HEADER_SIZE;
        bytes[second_payload_start] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        // The log is kept as a clean prefix: everything from the bad frame
        // on is dropped.
        let backend = FsLogBackend::open(&path, false).unwrap();
        assert_eq!(backend.len(), 1);
        assert!(backend
            .fetch_by_id(stmt(0, 0).id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        assert!(backend.is_empty());
        let page = backend.query(&query()).await.unwrap();
        assert!(page.statements.is_empty() && page.next.is_none());
    }

    #[tokio::test]
    async fn synced_writes_are_durable() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let backend = FsLogBackend::open(&path, true).unwrap();
        backend.write(&stmt(1, 0)).await.unwrap();
        drop(backend);
        let backend = FsLogBackend::open(&path, true).unwrap();
        assert_eq!(backend.len(), 1);
    }

    // --- pagination ---

    #[tokio::test]
    async fn pagination_visits_each_exactly_once() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        for n in 0..10 {
            backend.write(&stmt(n, n as i64)).await.unwrap();
        }

        let all = drain(&backend, query().with_limit(3).with_order(SortOrder::Ascending)).await;
        assert_eq!(all.len(), 10);
        let mut seen = HashSet::new();
        for statement in &all {
            assert!(seen.insert(statement.id));
        }
        for window in all.windows(2) {
            assert!(window[0].stored <= window[1].stored);
        }
    }

    #[tokio::test]
    async fn pagination_spans_reopen_generations() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let backend = FsLogBackend::open(&path, false).unwrap();
            for n in 0..4 {
                backend.write(&stmt(n, n as i64)).await.unwrap();
            }
        }
        let backend = FsLogBackend::open(&path, false).unwrap();
        for n in 4..8 {
            backend.write(&stmt(n, n as i64)).await.unwrap();
        }

        let all = drain(&backend, query().with_limit(3)).await;
        assert_eq!(all.len(), 8);
    }

    #[tokio::test]
    async fn garbage_cursor_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        backend.write(&stmt(1, 0)).await.unwrap();
        let mut q = query();
        q.cursor = Some(Cursor::from_token("ffff"));
        assert!(matches!(
            backend.query(&q).await.unwrap_err(),
            BackendError::BadRequest(_)
        ));
    }

    // --- health ---

    #[tokio::test]
    async fn health_reflects_file_presence() {
        let dir = TempDir::new().unwrap();
        let backend = FsLogBackend::open(&log_path(&dir), false).unwrap();
        assert_eq!(backend.health().await, BackendHealth::Healthy);
        assert_eq!(backend.name(), "fslog");

        fs::remove_file(backend.path()).unwrap();
        assert_eq!(backend.health().await, BackendHealth::Unreachable);
    }
}
