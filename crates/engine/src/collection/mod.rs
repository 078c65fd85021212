//! Collection (spec.md §4.5): binds the document store and index family,
//! owns per-collection locking and the query result cache, and is the
//! landing point for both direct calls and a session's commit replay.

mod cache;
mod locks;

use crate::query::{self, Plan, Predicate, QueryOptions};
use crate::update;
use cache::QueryCache;
use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::value::{Document, ObjectId, Value};
use corvid_storage::docstore::DocumentStore;
use corvid_storage::index::{
    GeoQuery, Index, IndexError, IndexKey, IndexKind, IndexStats, SpecializedHits, SpecializedQuery,
};
use locks::StripedLocks;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A named index plus its catalogue metadata (spec.md §3, §4.2 step 1).
pub struct IndexEntry {
    /// The index implementation.
    pub index: Box<dyn Index>,
    /// Which family it belongs to.
    pub kind: IndexKind,
    /// Build/maintenance state.
    pub state: corvid_storage::index::BuildState,
}

/// Turn an index-layer collision into the engine's `DuplicateKey`, carrying
/// the index's own name and the actual colliding key rather than this
/// collection's operation-level name/id.
fn duplicate_key_error(name: &str, err: IndexError) -> CorvidError {
    match err {
        IndexError::DuplicateKey { index, key } => CorvidError::DuplicateKey { index, key },
        other => CorvidError::DuplicateKey { index: name.to_string(), key: other.to_string() },
    }
}

/// A fully resolved index specification, used by `create_index` (spec.md
/// §4.2). Partial/sparse composition is expressed by wrapping the built
/// index kind before handing it to `create_index`, so this enum only
/// names the base kinds plus their construction parameters.
pub enum IndexSpec {
    /// Ordered (possibly compound) B-tree index.
    Ordered {
        /// Field paths to project the key from.
        field_paths: Vec<String>,
        /// Whether to reject duplicate keys.
        unique: bool,
    },
    /// Full-text search index.
    Text {
        /// Field paths to tokenize.
        field_paths: Vec<String>,
    },
    /// Flat-plane geo index.
    Geo2d {
        /// Single field path holding a `Geometry::Point`.
        field_path: String,
    },
    /// Spherical (Earth-surface) geo index.
    Geo2dSphere {
        /// Single field path holding a `Geometry::Point`.
        field_path: String,
    },
    /// TTL index: timestamp field plus expiry duration.
    Ttl {
        /// Field path holding the timestamp.
        field_path: String,
        /// Time-to-live, in microseconds.
        ttl_micros: u64,
    },
    /// Wraps any other spec so only documents matching `filter` are
    /// indexed (spec.md §4.2 "Partial index"). `filter` must be non-empty.
    Partial {
        /// The base index specification to wrap.
        inner: Box<IndexSpec>,
        /// Equality filter gating membership (`{field: value}` pairs,
        /// matching `PartialIndex::from_equality_filter`'s contract).
        filter: Document,
    },
}

/// Statistics `collection_stats` reports (supplements spec.md §4.11's
/// "aggregate stats" with a per-collection breakdown).
#[derive(Debug, Clone)]
pub struct CollectionStats {
    /// Document count.
    pub document_count: usize,
    /// Number of indexes, ready or building.
    pub index_count: usize,
    /// Document store cache hit rate.
    pub cache_hit_rate: f64,
}

/// One index's catalogue metadata, as reported for backup (spec.md §6).
#[derive(Debug, Clone)]
pub struct IndexCatalogEntry {
    /// Index name.
    pub name: String,
    /// Base kind (a partial wrapper reports its inner kind).
    pub kind: IndexKind,
    /// Field paths the index projects keys from.
    pub field_paths: Vec<String>,
    /// Whether the index enforces key uniqueness.
    pub unique: bool,
    /// Configured time-to-live in microseconds, for TTL indexes.
    pub ttl_micros: Option<u64>,
}

/// A single named collection of documents (spec.md §4.5).
pub struct Collection {
    name: RwLock<String>,
    lock: RwLock<()>,
    docs: DocumentStore,
    indexes: RwLock<HashMap<String, IndexEntry>>,
    doc_locks: StripedLocks,
    cache: QueryCache,
    closed: AtomicBool,
}

impl Collection {
    /// Build an empty collection named `name` over a fresh document store.
    pub fn new(name: impl Into<String>, docs: DocumentStore) -> Self {
        Collection {
            name: RwLock::new(name.into()),
            lock: RwLock::new(()),
            docs,
            indexes: RwLock::new(HashMap::new()),
            doc_locks: StripedLocks::new(64),
            cache: QueryCache::new(256),
            closed: AtomicBool::new(false),
        }
    }

    /// The collection's name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename the collection in place, for `Database::rename_collection`
    /// (spec.md §4.11).
    pub fn rename(&self, new_name: impl Into<String>) {
        *self.name.write() = new_name.into();
    }

    fn ensure_open(&self) -> CorvidResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CorvidError::Closed);
        }
        Ok(())
    }

    /// Mark the collection closed; subsequent operations fail with
    /// `Closed` (spec.md §4.11).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Insert a document, assigning `_id` if missing. Indexes every
    /// eligible index before the document store, rolling back prior index
    /// insertions if a later one fails (spec.md §4.5).
    pub fn insert_one(&self, mut doc: Document) -> CorvidResult<ObjectId> {
        self.ensure_open()?;
        let _guard = self.lock.write();

        let id = match doc.get("_id") {
            Some(Value::ObjectId(id)) => *id,
            Some(_) => return Err(CorvidError::invalid_argument("_id must be an ObjectId")),
            None => {
                let id = ObjectId::new();
                doc.set("_id", Value::ObjectId(id));
                id
            }
        };
        let _doc_guard = self.doc_locks.lock(id);

        let mut indexes = self.indexes.write();
        let mut inserted: Vec<&str> = Vec::new();
        for (name, entry) in indexes.iter_mut() {
            match entry.index.insert(&doc, id) {
                Ok(()) => inserted.push(name),
                Err(e) => {
                    for name in &inserted {
                        if let Some(entry) = indexes.get_mut(*name) {
                            entry.index.delete(&doc, id);
                        }
                    }
                    return Err(duplicate_key_error(name, e));
                }
            }
        }
        drop(indexes);

        if let Err(e) = self.docs.insert(id, &doc) {
            let mut indexes = self.indexes.write();
            for entry in indexes.values_mut() {
                entry.index.delete(&doc, id);
            }
            return Err(e);
        }
        self.cache.invalidate_all();
        Ok(id)
    }

    /// Fetch one document by id.
    pub fn find_by_id(&self, id: &ObjectId) -> CorvidResult<Document> {
        self.ensure_open()?;
        self.docs.get(id)
    }

    /// Apply `update` to the document `id`, pinned under its document
    /// stripe lock, maintaining every index afterward.
    pub fn update_one(&self, id: &ObjectId, update_doc: &Document) -> CorvidResult<Document> {
        self.ensure_open()?;
        let _guard = self.lock.read();
        let _doc_guard = self.doc_locks.lock(*id);

        let before = self.docs.get(id)?;
        let mut after = before.clone();
        update::apply_update(&mut after, update_doc)?;

        let mut indexes = self.indexes.write();
        for entry in indexes.values_mut() {
            entry.index.delete(&before, *id);
        }
        let mut inserted: Vec<&str> = Vec::new();
        for (name, entry) in indexes.iter_mut() {
            match entry.index.insert(&after, *id) {
                Ok(()) => inserted.push(name),
                Err(e) => {
                    for name in &inserted {
                        if let Some(entry) = indexes.get_mut(*name) {
                            entry.index.delete(&after, *id);
                        }
                    }
                    for entry in indexes.values_mut() {
                        let _ = entry.index.insert(&before, *id);
                    }
                    return Err(duplicate_key_error(name, e));
                }
            }
        }
        drop(indexes);

        self.docs.update(id, &after)?;
        self.cache.invalidate_all();
        Ok(after)
    }

    /// Delete a document by id, removing it from every index.
    pub fn delete_one(&self, id: &ObjectId) -> CorvidResult<()> {
        self.ensure_open()?;
        let _guard = self.lock.read();
        let _doc_guard = self.doc_locks.lock(*id);

        let doc = self.docs.get(id)?;
        let mut indexes = self.indexes.write();
        for entry in indexes.values_mut() {
            entry.index.delete(&doc, *id);
        }
        drop(indexes);

        self.docs.delete(id)?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Run a filter + options query (spec.md §4.3): seeks a usable index
    /// whose full key is bound by the filter's top-level equality clauses
    /// and fetches only its candidate ids, falling back to a full scan when
    /// no index covers the predicate this way.
    pub fn find(&self, filter: &Document, options: &QueryOptions) -> CorvidResult<Vec<Document>> {
        self.ensure_open()?;
        let _guard = self.lock.read();

        let cache_key = cache::key_for(filter, options);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let predicate = query::compile(filter)?;
        let candidates = self.best_seekable_index(&predicate).map(|(_, ids)| ids);
        let mut matches = Vec::new();
        match candidates {
            Some(ids) => {
                for id in ids {
                    let doc = self.docs.get(&id)?;
                    if query::matches(&predicate, &doc) {
                        matches.push(doc);
                    }
                }
            }
            None => {
                for id in self.docs.all_ids() {
                    let doc = self.docs.get(&id)?;
                    if query::matches(&predicate, &doc) {
                        matches.push(doc);
                    }
                }
            }
        }
        let shaped = query::shape_results(matches, options);
        self.cache.put(cache_key, shaped.clone());
        Ok(shaped)
    }

    /// The cheapest usable, non-partial index whose whole key is bound by
    /// `predicate`'s top-level equality clauses, seeked directly and
    /// returning its candidate ids. Shared by `find` (to actually execute
    /// the seek) and `explain` (to report the same choice), so the two
    /// never disagree about what will run.
    fn best_seekable_index(&self, predicate: &Predicate) -> Option<(String, Vec<ObjectId>)> {
        let bindings = query::equality_bindings(predicate);
        if bindings.is_empty() {
            return None;
        }
        let indexes = self.indexes.read();
        let mut best: Option<(String, Vec<ObjectId>)> = None;
        for (name, entry) in indexes.iter() {
            if !entry.state.is_usable() {
                continue;
            }
            let paths = entry.index.field_paths();
            if paths.is_empty() || !paths.iter().all(|p| bindings.contains_key(p)) {
                continue;
            }
            let key = if paths.len() == 1 {
                IndexKey::from_value(&bindings[&paths[0]])
            } else {
                IndexKey::Compound(paths.iter().map(|p| IndexKey::from_value(&bindings[p])).collect())
            };
            let Some(ids) = entry.index.point_lookup(&key) else {
                continue;
            };
            if best.as_ref().map(|(_, b)| ids.len() < b.len()).unwrap_or(true) {
                best = Some((name.clone(), ids));
            }
        }
        best
    }

    /// Convenience wrapper: first matching document, if any.
    pub fn find_one(&self, filter: &Document) -> CorvidResult<Option<Document>> {
        let options = QueryOptions { limit: Some(1), ..QueryOptions::default() };
        Ok(self.find(filter, &options)?.into_iter().next())
    }

    /// Count documents matching `filter`.
    pub fn count(&self, filter: &Document) -> CorvidResult<usize> {
        self.ensure_open()?;
        let _guard = self.lock.read();
        let predicate: Predicate = query::compile(filter)?;
        let mut total = 0;
        for id in self.docs.all_ids() {
            let doc = self.docs.get(&id)?;
            if query::matches(&predicate, &doc) {
                total += 1;
            }
        }
        Ok(total)
    }

    /// Build an index synchronously over the current document set, then
    /// register it as `Ready` (spec.md §4.2's online-build protocol
    /// without the worker-pool hop; `create_index_background` below
    /// schedules the same work asynchronously).
    pub fn create_index(&self, name: impl Into<String>, spec: IndexSpec) -> CorvidResult<()> {
        let name = name.into();
        self.ensure_open()?;
        let (mut index, kind) = build_index(&spec)?;
        let ids = self.docs.all_ids();
        for id in &ids {
            let doc = self.docs.get(id)?;
            index
                .insert(&doc, *id)
                .map_err(|e| CorvidError::invalid_argument(e.to_string()))?;
        }
        self.indexes.write().insert(
            name,
            IndexEntry { index, kind, state: corvid_storage::index::BuildState::Ready },
        );
        self.cache.invalidate_all();
        Ok(())
    }

    /// Register an index in `Building` state immediately (visible to
    /// `list_indexes` with 0 progress), returning the snapshot of ids the
    /// caller's worker-pool task should populate it from. Concurrent
    /// writes during the build must also call `index_insert_if_building`.
    pub fn begin_index_build(&self, name: impl Into<String>, spec: IndexSpec) -> CorvidResult<Vec<ObjectId>> {
        let name = name.into();
        let (index, kind) = build_index(&spec)?;
        let ids = self.docs.all_ids();
        self.indexes.write().insert(
            name,
            IndexEntry {
                index,
                kind,
                state: corvid_storage::index::BuildState::Building { total: ids.len(), processed: 0 },
            },
        );
        Ok(ids)
    }

    /// Feed one document of an in-progress build (idempotent on
    /// duplicate ids per spec.md §4.2 step 3).
    pub fn index_build_step(&self, name: &str, id: ObjectId) -> CorvidResult<()> {
        let doc = self.docs.get(&id)?;
        let mut indexes = self.indexes.write();
        let Some(entry) = indexes.get_mut(name) else {
            return Ok(());
        };
        if let corvid_storage::index::BuildState::Building { total, processed } = &mut entry.state {
            let _ = entry.index.insert(&doc, id);
            *processed += 1;
            if *processed >= *total {
                entry.state = corvid_storage::index::BuildState::Ready;
            }
        }
        Ok(())
    }

    /// Mark a building index failed, freezing progress (spec.md §4.2
    /// step 4).
    pub fn fail_index_build(&self, name: &str, cause: impl Into<String>) {
        if let Some(entry) = self.indexes.write().get_mut(name) {
            entry.state = corvid_storage::index::BuildState::Failed { cause: cause.into() };
        }
    }

    /// Index names and their current build state (spec.md §4.2 step 5).
    pub fn list_indexes(&self) -> Vec<(String, corvid_storage::index::BuildState, IndexStats)> {
        self.indexes
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone(), entry.index.stats()))
            .collect()
    }

    /// Full catalogue metadata for every index, for backup (spec.md §6).
    pub fn index_catalog(&self) -> Vec<IndexCatalogEntry> {
        self.indexes
            .read()
            .iter()
            .map(|(name, entry)| IndexCatalogEntry {
                name: name.clone(),
                kind: entry.kind,
                field_paths: entry.index.field_paths().to_vec(),
                unique: entry.index.is_unique(),
                ttl_micros: entry.index.ttl_micros(),
            })
            .collect()
    }

    /// Remove an index by name.
    pub fn drop_index(&self, name: &str) -> CorvidResult<()> {
        self.indexes
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CorvidError::not_found("index", name))
    }

    /// A cost-based (but not executed) plan for `filter`/`options`,
    /// supplementing spec.md §4.3 with an inspectable `explain()`. Reports
    /// exactly the index `find` will seek, via `best_seekable_index`, so
    /// the two never disagree about whether an index is actually used.
    pub fn explain(&self, filter: &Document, options: &QueryOptions) -> Plan {
        let _ = options;
        let predicate = match query::compile(filter) {
            Ok(p) => p,
            Err(_) => return Plan { index_used: None, covered: false, estimated_cost: self.docs.count() },
        };
        match self.best_seekable_index(&predicate) {
            Some((name, ids)) => Plan { index_used: Some(name), covered: false, estimated_cost: ids.len().max(1) },
            None => Plan { index_used: None, covered: false, estimated_cost: self.docs.count() },
        }
    }

    /// Rank documents in the named text index against a free-text query,
    /// best match first (spec.md §3's BM25-style search).
    pub fn text_search(&self, index_name: &str, query: &str, limit: Option<usize>) -> CorvidResult<Vec<Document>> {
        self.ensure_open()?;
        let hits = match self.run_specialized_query(index_name, &SpecializedQuery::Text { query, limit })? {
            SpecializedHits::Text(hits) => hits,
            _ => return Err(CorvidError::invalid_argument(format!("{index_name} is not a text index"))),
        };
        hits.into_iter().map(|hit| self.docs.get(&hit.doc_id)).collect()
    }

    /// Documents within `radius` of `center` in the named geo index, nearest
    /// first, each carrying a synthetic `_distance` field (spec.md §3).
    pub fn geo_near(&self, index_name: &str, center: (f64, f64), radius: f64) -> CorvidResult<Vec<Document>> {
        self.ensure_open()?;
        let query = GeoQuery::Near { center, radius };
        let hits = match self.run_specialized_query(index_name, &SpecializedQuery::Geo(&query))? {
            SpecializedHits::GeoNear(hits) => hits,
            _ => return Err(CorvidError::invalid_argument(format!("{index_name} is not a geo index"))),
        };
        hits.into_iter()
            .map(|hit| {
                let mut doc = self.docs.get(&hit.doc_id)?;
                doc.set("_distance", Value::F64(hit.distance));
                Ok(doc)
            })
            .collect()
    }

    /// Documents in the named geo index that fall inside `polygon`
    /// (spec.md §3's point-in-polygon `within`).
    pub fn geo_within(&self, index_name: &str, polygon: Vec<(f64, f64)>) -> CorvidResult<Vec<Document>> {
        self.ensure_open()?;
        let query = GeoQuery::Within { polygon };
        let ids = match self.run_specialized_query(index_name, &SpecializedQuery::Geo(&query))? {
            SpecializedHits::GeoIds(ids) => ids,
            _ => return Err(CorvidError::invalid_argument(format!("{index_name} is not a geo index"))),
        };
        ids.into_iter().map(|id| self.docs.get(&id)).collect()
    }

    /// Documents in the named geo index that fall inside the axis-aligned
    /// box `[min, max]` (spec.md §3's `intersects`).
    pub fn geo_intersects(&self, index_name: &str, min: (f64, f64), max: (f64, f64)) -> CorvidResult<Vec<Document>> {
        self.ensure_open()?;
        let query = GeoQuery::Intersects { min, max };
        let ids = match self.run_specialized_query(index_name, &SpecializedQuery::Geo(&query))? {
            SpecializedHits::GeoIds(ids) => ids,
            _ => return Err(CorvidError::invalid_argument(format!("{index_name} is not a geo index"))),
        };
        ids.into_iter().map(|id| self.docs.get(&id)).collect()
    }

    fn run_specialized_query(&self, index_name: &str, query: &SpecializedQuery) -> CorvidResult<SpecializedHits> {
        let _guard = self.lock.read();
        let indexes = self.indexes.read();
        let entry = indexes.get(index_name).ok_or_else(|| CorvidError::not_found("index", index_name))?;
        entry
            .index
            .specialized_query(query)
            .ok_or_else(|| CorvidError::invalid_argument(format!("{index_name} does not support this query")))
    }

    /// Point-in-time statistics for this collection.
    pub fn stats(&self) -> CollectionStats {
        let doc_stats = self.docs.stats();
        CollectionStats {
            document_count: doc_stats.document_count,
            index_count: self.indexes.read().len(),
            cache_hit_rate: doc_stats.cache_hit_rate,
        }
    }

    /// Every TTL index's name, for the background reaper (spec.md §4.9).
    pub fn ttl_index_names(&self) -> Vec<String> {
        self.indexes
            .read()
            .iter()
            .filter(|(_, e)| e.kind == IndexKind::Ttl)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Every TTL index's watched field path and configured lifetime, for
    /// the background reaper (spec.md §4.9).
    pub fn ttl_field_config(&self) -> Vec<(String, u64)> {
        self.indexes
            .read()
            .values()
            .filter_map(|e| {
                let ttl_micros = e.index.ttl_micros()?;
                let field_path = e.index.field_paths().first()?.clone();
                Some((field_path, ttl_micros))
            })
            .collect()
    }

    /// Delete every document whose `field_path` timestamp is more than
    /// `ttl_micros` before `now`, via the ordinary delete path so indexes
    /// stay coherent (spec.md §4.9). Returns the number reaped.
    pub fn expire_ttl(&self, field_path: &str, ttl_micros: u64, now: corvid_core::value::Timestamp) -> CorvidResult<usize> {
        let cutoff = corvid_core::value::Timestamp::from_micros(now.as_micros().saturating_sub(ttl_micros));
        let mut filter = Document::new();
        let mut lt = Document::new();
        lt.set("$lt", Value::Timestamp(cutoff));
        filter.set(field_path, Value::Document(lt));

        let expired = self.find(&filter, &QueryOptions::default())?;
        let mut reaped = 0;
        for doc in expired {
            if let Some(Value::ObjectId(id)) = doc.get("_id") {
                if self.delete_one(id).is_ok() {
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }
}

fn build_index(spec: &IndexSpec) -> CorvidResult<(Box<dyn Index>, IndexKind)> {
    Ok(match spec {
        IndexSpec::Ordered { field_paths, unique } => (
            Box::new(corvid_storage::index::OrderedIndex::new("idx".to_string(), field_paths.clone(), *unique)),
            IndexKind::Ordered,
        ),
        IndexSpec::Text { field_paths } => {
            (Box::new(corvid_storage::index::TextIndex::new(field_paths.clone())), IndexKind::Text)
        }
        IndexSpec::Geo2d { field_path } => (
            Box::new(
                corvid_storage::index::GeoIndex::new(corvid_storage::index::GeoKind::Flat, vec![field_path.clone()])
                    .map_err(|e| CorvidError::invalid_argument(e.to_string()))?,
            ),
            IndexKind::Geo2d,
        ),
        IndexSpec::Geo2dSphere { field_path } => (
            Box::new(
                corvid_storage::index::GeoIndex::new(
                    corvid_storage::index::GeoKind::Spherical,
                    vec![field_path.clone()],
                )
                .map_err(|e| CorvidError::invalid_argument(e.to_string()))?,
            ),
            IndexKind::Geo2dSphere,
        ),
        IndexSpec::Ttl { field_path, ttl_micros } => {
            (Box::new(corvid_storage::index::TtlIndex::new(field_path.clone(), *ttl_micros)), IndexKind::Ttl)
        }
        IndexSpec::Partial { inner, filter } => {
            if filter.iter().next().is_none() {
                return Err(CorvidError::invalid_argument("partial index filter must be non-empty"));
            }
            let requirements: Vec<(String, Value)> = filter.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            let (inner_index, kind) = build_index(inner)?;
            let wrapped = corvid_storage::index::PartialIndex::from_equality_filter(inner_index, requirements)
                .map_err(|e| CorvidError::invalid_argument(e.to_string()))?;
            (Box::new(wrapped), kind)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_storage::docstore::MemPageManager;

    fn fresh_collection() -> Collection {
        let docs = DocumentStore::new(Box::new(MemPageManager::new()), 16);
        Collection::new("people", docs)
    }

    fn person(name: &str, age: i64) -> Document {
        let mut d = Document::new();
        d.set("name", Value::String(name.to_string()));
        d.set("age", Value::I64(age));
        d
    }

    #[test]
    fn insert_assigns_id_and_find_roundtrips() {
        let col = fresh_collection();
        let id = col.insert_one(person("Alice", 30)).unwrap();
        let found = col.find_by_id(&id).unwrap();
        assert_eq!(found.get("name"), Some(&Value::String("Alice".into())));
    }

    #[test]
    fn update_one_applies_operators_and_reindexes() {
        let col = fresh_collection();
        col.create_index("by_age", IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }).unwrap();
        let id = col.insert_one(person("Bob", 20)).unwrap();

        let mut update_doc = Document::new();
        update_doc.set("$inc", Value::Document({
            let mut b = Document::new();
            b.set("age", Value::I64(1));
            b
        }));
        let after = col.update_one(&id, &update_doc).unwrap();
        assert_eq!(after.get("age"), Some(&Value::I64(21)));
    }

    #[test]
    fn unique_index_violation_rolls_back_insert() {
        let col = fresh_collection();
        col.create_index("by_name", IndexSpec::Ordered { field_paths: vec!["name".into()], unique: true }).unwrap();
        col.insert_one(person("Carol", 1)).unwrap();
        let err = col.insert_one(person("Carol", 2));
        assert!(err.is_err());
        assert_eq!(col.count(&Document::new()).unwrap(), 1);
    }

    #[test]
    fn delete_removes_document_and_index_entries() {
        let col = fresh_collection();
        let id = col.insert_one(person("Dan", 40)).unwrap();
        col.delete_one(&id).unwrap();
        assert!(col.find_by_id(&id).is_err());
    }

    #[test]
    fn find_applies_filter_and_limit() {
        let col = fresh_collection();
        col.insert_one(person("A", 1)).unwrap();
        col.insert_one(person("B", 2)).unwrap();
        let options = QueryOptions { limit: Some(1), ..QueryOptions::default() };
        let results = col.find(&Document::new(), &options).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn operations_after_close_fail() {
        let col = fresh_collection();
        col.close();
        assert!(matches!(col.insert_one(person("X", 1)), Err(CorvidError::Closed)));
    }

    #[test]
    fn online_build_step_transitions_to_ready() {
        let col = fresh_collection();
        col.insert_one(person("A", 1)).unwrap();
        col.insert_one(person("B", 2)).unwrap();
        let ids = col
            .begin_index_build("by_name", IndexSpec::Ordered { field_paths: vec!["name".into()], unique: false })
            .unwrap();
        for id in ids {
            col.index_build_step("by_name", id).unwrap();
        }
        let listed = col.list_indexes();
        let (_, state, _) = listed.iter().find(|(n, _, _)| n == "by_name").unwrap();
        assert_eq!(*state, corvid_storage::index::BuildState::Ready);
    }

    #[test]
    fn partial_index_rejects_empty_filter() {
        let col = fresh_collection();
        let spec = IndexSpec::Partial {
            inner: Box::new(IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }),
            filter: Document::new(),
        };
        assert!(matches!(col.create_index("by_age_active", spec), Err(CorvidError::InvalidArgument(_))));
    }

    #[test]
    fn partial_index_only_covers_matching_documents() {
        let col = fresh_collection();
        col.insert_one(person("A", 1)).unwrap();
        col.insert_one(person("B", 2)).unwrap();

        let mut filter = Document::new();
        filter.set("age", Value::I64(1));
        let spec = IndexSpec::Partial {
            inner: Box::new(IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }),
            filter,
        };
        col.create_index("by_age_one", spec).unwrap();
        let listed = col.list_indexes();
        let (_, _, stats) = listed.iter().find(|(n, _, _)| n == "by_age_one").unwrap();
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn find_seeks_an_equality_index_instead_of_scanning() {
        let col = fresh_collection();
        col.insert_one(person("A", 1)).unwrap();
        col.insert_one(person("B", 2)).unwrap();
        col.create_index("by_age", IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }).unwrap();

        let mut filter = Document::new();
        filter.set("age", Value::I64(2));
        let found = col.find(&filter, &QueryOptions::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("name"), Some(&Value::String("B".into())));
    }

    #[test]
    fn explain_reports_the_same_index_find_would_seek() {
        let col = fresh_collection();
        col.insert_one(person("A", 1)).unwrap();
        col.create_index("by_age", IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }).unwrap();

        let mut filter = Document::new();
        filter.set("age", Value::I64(1));
        let plan = col.explain(&filter, &QueryOptions::default());
        assert_eq!(plan.index_used.as_deref(), Some("by_age"));

        let found = col.find(&filter, &QueryOptions::default()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn explain_reports_no_index_without_an_equality_clause() {
        let col = fresh_collection();
        col.create_index("by_age", IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }).unwrap();

        let mut ops = Document::new();
        ops.set("$gt", Value::I64(0));
        let mut filter = Document::new();
        filter.set("age", Value::Document(ops));
        let plan = col.explain(&filter, &QueryOptions::default());
        assert_eq!(plan.index_used, None);
    }

    #[test]
    fn text_search_ranks_by_the_named_index() {
        let col = fresh_collection();
        col.create_index("by_bio", IndexSpec::Text { field_paths: vec!["bio".into()] }).unwrap();
        let mut quiet = person("A", 1);
        quiet.set("bio", Value::String("a quiet evening".into()));
        let mut loud = person("B", 2);
        loud.set("bio", Value::String("fox fox fox everywhere".into()));
        col.insert_one(quiet).unwrap();
        col.insert_one(loud).unwrap();

        let hits = col.text_search("by_bio", "fox", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("name"), Some(&Value::String("B".into())));
    }

    #[test]
    fn text_search_against_a_non_text_index_is_an_error() {
        let col = fresh_collection();
        col.create_index("by_age", IndexSpec::Ordered { field_paths: vec!["age".into()], unique: false }).unwrap();
        assert!(matches!(col.text_search("by_age", "x", None), Err(CorvidError::InvalidArgument(_))));
    }

    #[test]
    fn geo_near_attaches_a_distance_field() {
        use corvid_core::value::Geometry;
        let col = fresh_collection();
        col.create_index("by_loc", IndexSpec::Geo2d { field_path: "loc".into() }).unwrap();
        let mut near = person("Near", 1);
        near.set("loc", Value::Geometry(Geometry::Point { lon: 0.0, lat: 0.0 }));
        let mut far = person("Far", 2);
        far.set("loc", Value::Geometry(Geometry::Point { lon: 100.0, lat: 100.0 }));
        col.insert_one(near).unwrap();
        col.insert_one(far).unwrap();

        let hits = col.geo_near("by_loc", (0.0, 0.0), 5.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("name"), Some(&Value::String("Near".into())));
        assert!(matches!(hits[0].get("_distance"), Some(Value::F64(_))));
    }

    #[test]
    fn geo_within_and_intersects_route_to_the_named_index() {
        use corvid_core::value::Geometry;
        let col = fresh_collection();
        col.create_index("by_loc", IndexSpec::Geo2d { field_path: "loc".into() }).unwrap();
        let mut inside = person("Inside", 1);
        inside.set("loc", Value::Geometry(Geometry::Point { lon: 1.0, lat: 1.0 }));
        let mut outside = person("Outside", 2);
        outside.set("loc", Value::Geometry(Geometry::Point { lon: 50.0, lat: 50.0 }));
        col.insert_one(inside).unwrap();
        col.insert_one(outside).unwrap();

        let square = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let within = col.geo_within("by_loc", square).unwrap();
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].get("name"), Some(&Value::String("Inside".into())));

        let intersecting = col.geo_intersects("by_loc", (0.0, 0.0), (10.0, 10.0)).unwrap();
        assert_eq!(intersecting.len(), 1);
        assert_eq!(intersecting[0].get("name"), Some(&Value::String("Inside".into())));
    }

    #[test]
    fn geo_query_against_an_unknown_index_is_not_found() {
        let col = fresh_collection();
        assert!(matches!(col.geo_near("missing", (0.0, 0.0), 1.0), Err(CorvidError::NotFound { .. })));
    }
}
