//! Cursor manager (spec.md §4.10): paginated server-side iterators over a
//! materialized query result, with idle timeout.
//!
//! No direct teacher counterpart; built in the idiom of its other
//! `DashMap`-keyed registries (commit locks per collection, the open-database
//! registry) — one `DashMap<CursorId, Mutex<CursorState>>` indexed by a
//! randomly generated id.

use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::value::Document;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A 128-bit random cursor identifier, rendered as lowercase hex
/// (spec.md §3 "128-bit random hex").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(u128);

static CURSOR_COUNTER: AtomicU64 = AtomicU64::new(0);

impl CursorId {
    fn new() -> Self {
        // Process-random high half (derived the same way `ObjectId`'s
        // process-random component is) plus a monotonic low half, avoiding
        // a dependency on an external RNG crate for an in-process id.
        let high = {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            std::process::id().hash(&mut hasher);
            Instant::now().hash(&mut hasher);
            hasher.finish()
        };
        let low = CURSOR_COUNTER.fetch_add(1, Ordering::Relaxed);
        CursorId(((high as u128) << 64) | low as u128)
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl std::fmt::Display for CursorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

struct CursorState {
    collection: String,
    results: Vec<Document>,
    position: usize,
    batch_size: usize,
    idle_timeout: Duration,
    last_accessed: Instant,
}

impl CursorState {
    fn is_exhausted(&self) -> bool {
        self.position >= self.results.len()
    }

    fn is_timed_out(&self) -> bool {
        self.last_accessed.elapsed() > self.idle_timeout
    }
}

/// Registry of open cursors (spec.md §4.10, §3).
pub struct CursorManager {
    cursors: DashMap<CursorId, Mutex<CursorState>>,
    default_idle_timeout: Duration,
}

impl CursorManager {
    /// A manager using `default_idle_timeout` for cursors that don't
    /// specify their own.
    pub fn new(default_idle_timeout: Duration) -> Self {
        CursorManager {
            cursors: DashMap::new(),
            default_idle_timeout,
        }
    }

    /// Register a materialized result set under a fresh cursor id.
    pub fn open(&self, collection: impl Into<String>, results: Vec<Document>, batch_size: usize) -> CursorId {
        self.open_with_timeout(collection, results, batch_size, self.default_idle_timeout)
    }

    /// Same as `open`, with an explicit idle timeout override.
    pub fn open_with_timeout(
        &self,
        collection: impl Into<String>,
        results: Vec<Document>,
        batch_size: usize,
        idle_timeout: Duration,
    ) -> CursorId {
        let id = CursorId::new();
        self.cursors.insert(
            id,
            Mutex::new(CursorState {
                collection: collection.into(),
                results,
                position: 0,
                batch_size: batch_size.max(1),
                idle_timeout,
                last_accessed: Instant::now(),
            }),
        );
        id
    }

    fn access<'a>(&'a self, id: CursorId) -> CorvidResult<dashmap::mapref::one::Ref<'a, CursorId, Mutex<CursorState>>> {
        let entry = self.cursors.get(&id).ok_or_else(|| CorvidError::not_found("cursor", id.to_string()))?;
        let timed_out = entry.lock().is_timed_out();
        if timed_out {
            drop(entry);
            self.cursors.remove(&id);
            return Err(CorvidError::Timeout { duration_ms: 0 });
        }
        Ok(entry)
    }

    /// Return the next single document, or `None` once exhausted.
    pub fn next(&self, id: CursorId) -> CorvidResult<Option<Document>> {
        let entry = self.access(id)?;
        let mut state = entry.lock();
        state.last_accessed = Instant::now();
        if state.is_exhausted() {
            return Ok(None);
        }
        let doc = state.results[state.position].clone();
        state.position += 1;
        Ok(Some(doc))
    }

    /// Return up to `n` documents, advancing the cursor's position.
    pub fn next_batch(&self, id: CursorId, n: usize) -> CorvidResult<Vec<Document>> {
        let entry = self.access(id)?;
        let mut state = entry.lock();
        state.last_accessed = Instant::now();
        let end = (state.position + n).min(state.results.len());
        let batch = state.results[state.position..end].to_vec();
        state.position = end;
        Ok(batch)
    }

    /// Return up to the cursor's configured batch size.
    pub fn next_default_batch(&self, id: CursorId) -> CorvidResult<Vec<Document>> {
        let batch_size = {
            let entry = self.access(id)?;
            entry.lock().batch_size
        };
        self.next_batch(id, batch_size)
    }

    /// Whether the cursor has yielded every result.
    pub fn is_exhausted(&self, id: CursorId) -> CorvidResult<bool> {
        let entry = self.access(id)?;
        Ok(entry.lock().is_exhausted())
    }

    /// Remove a cursor.
    pub fn close(&self, id: CursorId) {
        self.cursors.remove(&id);
    }

    /// Number of open cursors.
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether there are no open cursors.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Eagerly remove every cursor that is timed out or exhausted
    /// (spec.md §4.9, §4.10), returning how many were reaped.
    pub fn sweep(&self) -> usize {
        let dead: Vec<CursorId> = self
            .cursors
            .iter()
            .filter(|entry| {
                let state = entry.value().lock();
                state.is_timed_out() || state.is_exhausted()
            })
            .map(|entry| *entry.key())
            .collect();
        let count = dead.len();
        for id in dead {
            self.cursors.remove(&id);
        }
        count
    }

    /// Every cursor's owning collection name, for diagnostics (e.g. to
    /// refuse dropping a collection with open cursors, if a caller wants
    /// that policy).
    pub fn collections_in_use(&self) -> Vec<String> {
        self.cursors.iter().map(|e| e.value().lock().collection.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::value::Value;

    fn doc(n: i64) -> Document {
        let mut d = Document::new();
        d.set("n", Value::I64(n));
        d
    }

    #[test]
    fn next_yields_in_order_then_none() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let id = mgr.open("people", vec![doc(1), doc(2)], 10);
        assert_eq!(mgr.next(id).unwrap(), Some(doc(1)));
        assert_eq!(mgr.next(id).unwrap(), Some(doc(2)));
        assert_eq!(mgr.next(id).unwrap(), None);
    }

    #[test]
    fn next_batch_concatenation_matches_eager_materialization() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let all: Vec<Document> = (0..10).map(doc).collect();
        let id = mgr.open("people", all.clone(), 3);

        let mut collected = Vec::new();
        loop {
            let batch = mgr.next_batch(id, 3).unwrap();
            if batch.is_empty() {
                break;
            }
            collected.extend(batch);
        }
        assert_eq!(collected, all);
    }

    #[test]
    fn close_removes_cursor() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let id = mgr.open("people", vec![doc(1)], 10);
        mgr.close(id);
        assert!(mgr.next(id).is_err());
    }

    #[test]
    fn timed_out_cursor_is_closed_lazily_on_access() {
        let mgr = CursorManager::new(Duration::from_millis(0));
        let id = mgr.open("people", vec![doc(1)], 10);
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(mgr.next(id), Err(CorvidError::Timeout { .. })));
        assert_eq!(mgr.len(), 0);
    }

    #[test]
    fn sweep_reaps_exhausted_and_timed_out_cursors() {
        let mgr = CursorManager::new(Duration::from_secs(60));
        let exhausted = mgr.open("people", vec![doc(1)], 10);
        mgr.next(exhausted).unwrap();
        let active = mgr.open("people", vec![doc(1), doc(2)], 10);

        let reaped = mgr.sweep();
        assert_eq!(reaped, 1);
        assert!(mgr.next(active).unwrap().is_some());
    }
}
