//! The secondary-index catalogue (spec.md §3, §4.2).
//!
//! Every index kind implements [`Index`], the uniform capability set spec.md
//! §4.2 lists: `insert`/`delete`/`range`/`point`/`stats`/`field_paths`. This
//! is the vtable form of the "index polymorphism" redesign flag in spec.md
//! §9 (a `dyn Index` over a flat enum), chosen because the kinds' insert/
//! delete contracts are identical and only their internal storage and query
//! surface differ — a decision recorded in `DESIGN.md`.

mod geo;
mod ordered;
mod partial;
mod text;
mod ttl;

pub use geo::{GeoHit, GeoIndex, GeoKind, GeoQuery, SphericalPoint};
pub use ordered::OrderedIndex;
pub use partial::PartialIndex;
pub use text::{TextIndex, TextSearchHit};
pub use ttl::TtlIndex;

/// A kind-specific query that only geo and text indexes answer (spec.md
/// §4.2's `specialized_query(...)`); every other index kind returns `None`
/// from [`Index::specialized_query`].
pub enum SpecializedQuery<'a> {
    /// A geo shape query (`near`/`within`/`intersects`).
    Geo(&'a GeoQuery),
    /// A free-text ranked search, with an optional result cap.
    Text { query: &'a str, limit: Option<usize> },
}

/// The result of a [`SpecializedQuery`].
pub enum SpecializedHits {
    /// Distance-sorted hits from a `near` query.
    GeoNear(Vec<GeoHit>),
    /// Unordered doc-ids from a `within`/`intersects` query.
    GeoIds(Vec<ObjectId>),
    /// Relevance-ranked hits from a text search.
    Text(Vec<TextSearchHit>),
}

use corvid_core::value::{Document, ObjectId, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to index construction and maintenance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    /// A unique index rejected an insert because the key is already taken
    /// by a different document.
    #[error("duplicate key in index {index}: {key}")]
    DuplicateKey {
        /// The index's name.
        index: String,
        /// Debug rendering of the colliding key.
        key: String,
    },
    /// A partial index was given an empty filter.
    #[error("partial index filter must not be empty")]
    EmptyPartialFilter,
    /// A geo index was configured with other than exactly one field path.
    #[error("geo index requires exactly one field path, got {0}")]
    WrongGeoFieldCount(usize),
    /// An unrecognized index kind was requested (e.g. on restore).
    #[error("unknown index kind: {0}")]
    UnknownKind(String),
}

/// Which family an index belongs to, used for catalogue bookkeeping and
/// backup/restore (spec.md §6's `type ∈ {btree, text, geo, ttl}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Single-field or compound B-tree index.
    Ordered,
    /// Inverted-index full-text search.
    Text,
    /// Flat-plane 2d geo index.
    Geo2d,
    /// Spherical (Earth-surface) geo index.
    Geo2dSphere,
    /// Ordered index on a timestamp field plus an expiry duration.
    Ttl,
}

/// Build/maintenance state of an index (spec.md §3, §4.2 step 4).
#[derive(Debug, Clone, PartialEq)]
pub enum BuildState {
    /// Being populated by an online build task.
    Building {
        /// Snapshot size when the build started.
        total: usize,
        /// Documents processed so far by the build loop.
        processed: usize,
    },
    /// Fully built and safe to use for query planning.
    Ready,
    /// The build failed; the index is treated as absent by readers.
    Failed {
        /// Human-readable cause.
        cause: String,
    },
}

impl BuildState {
    /// Percent complete, 0-100. `Ready` is always 100; `Failed` freezes at
    /// whatever percent had been reached.
    pub fn percent_complete(&self) -> f64 {
        match self {
            BuildState::Building { total, processed } => {
                if *total == 0 {
                    100.0
                } else {
                    (*processed as f64 / *total as f64 * 100.0).min(100.0)
                }
            }
            BuildState::Ready => 100.0,
            BuildState::Failed { .. } => 0.0,
        }
    }

    /// Whether reads may use this index.
    pub fn is_usable(&self) -> bool {
        matches!(self, BuildState::Ready)
    }
}

/// Point-in-time statistics an index reports (spec.md §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    /// Number of (key, doc-id) entries.
    pub entry_count: usize,
    /// Rough distinct-key estimate, used by the query planner's cost model.
    pub cardinality_estimate: usize,
}

/// The comparable, totally ordered key an ordered/compound index projects
/// from a document. Sentinel `Null` sorts before every other variant,
/// matching spec.md §3's "missing components yield a null sentinel that
/// compares less than any non-null".
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum IndexKey {
    /// Field path didn't resolve, or resolved to `Value::Null`.
    Null,
    /// A single scalar key component.
    Scalar(ScalarKey),
    /// A compound key: one component per configured field path.
    Compound(Vec<IndexKey>),
}

/// Total order over scalar values: numeric, then string, then byte, then
/// everything else by a stable type tag (spec.md §3: "numeric →
/// lexicographic → type tag").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarKey {
    /// Any numeric value, compared as `f64`.
    Number(f64),
    /// A string value.
    String(String),
    /// A boolean value.
    Bool(bool),
    /// Anything else, compared by its JSON rendering (stable, if coarse).
    Other(String),
}

impl PartialEq for ScalarKey {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for ScalarKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering::*;
        let rank = |k: &ScalarKey| -> u8 {
            match k {
                ScalarKey::Number(_) => 0,
                ScalarKey::String(_) => 1,
                ScalarKey::Bool(_) => 2,
                ScalarKey::Other(_) => 3,
            }
        };
        match (self, other) {
            (ScalarKey::Number(a), ScalarKey::Number(b)) => a.partial_cmp(b),
            (ScalarKey::String(a), ScalarKey::String(b)) => Some(a.cmp(b)),
            (ScalarKey::Bool(a), ScalarKey::Bool(b)) => Some(a.cmp(b)),
            (ScalarKey::Other(a), ScalarKey::Other(b)) => Some(a.cmp(b)),
            _ => Some(rank(self).cmp(&rank(other))).map(|o| if o == Equal { Equal } else { o }),
        }
    }
}

impl IndexKey {
    /// Project a key from a value (used for a single field path component).
    pub fn from_value(value: &Value) -> IndexKey {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Scalar(ScalarKey::Bool(*b)),
            Value::I64(i) => IndexKey::Scalar(ScalarKey::Number(*i as f64)),
            Value::F64(f) => IndexKey::Scalar(ScalarKey::Number(*f)),
            Value::String(s) => IndexKey::Scalar(ScalarKey::String(s.clone())),
            Value::Timestamp(ts) => IndexKey::Scalar(ScalarKey::Number(ts.as_micros() as f64)),
            other => IndexKey::Scalar(ScalarKey::Other(format!("{other:?}"))),
        }
    }

    /// Project a compound key from several field paths resolved against a
    /// document. A path that doesn't resolve contributes `IndexKey::Null`.
    pub fn project(doc: &Document, field_paths: &[String]) -> IndexKey {
        if field_paths.len() == 1 {
            return doc
                .get_path(&field_paths[0])
                .map(IndexKey::from_value)
                .unwrap_or(IndexKey::Null);
        }
        IndexKey::Compound(
            field_paths
                .iter()
                .map(|p| doc.get_path(p).map(IndexKey::from_value).unwrap_or(IndexKey::Null))
                .collect(),
        )
    }

    /// A stable byte encoding preserving this key's sort order, used as the
    /// `encoded_key` component of a `StorageKey::index_entry`.
    pub fn encode(&self) -> Vec<u8> {
        // serde_json's key rendering isn't order-preserving in general, but
        // every call site here only uses the encoding as an opaque
        // tie-breaker alongside the doc id; actual ordering for range scans
        // is done by comparing `IndexKey` values directly (see
        // `OrderedIndex::range`), not by byte-comparing this encoding.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Whether this key is the null sentinel (missing field path).
    pub fn is_null(&self) -> bool {
        matches!(self, IndexKey::Null)
    }
}

impl Eq for ScalarKey {}
impl Ord for ScalarKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl Eq for IndexKey {}
impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        match (self, other) {
            (IndexKey::Null, IndexKey::Null) => Equal,
            (IndexKey::Null, _) => Less,
            (_, IndexKey::Null) => Greater,
            (IndexKey::Scalar(a), IndexKey::Scalar(b)) => a.cmp(b),
            (IndexKey::Compound(a), IndexKey::Compound(b)) => a.cmp(b),
            (IndexKey::Scalar(_), IndexKey::Compound(_)) => Less,
            (IndexKey::Compound(_), IndexKey::Scalar(_)) => Greater,
        }
    }
}

/// Uniform capability set every index kind implements (spec.md §4.2).
///
/// Object-safe so the collection layer can hold a heterogeneous
/// `Vec<Box<dyn Index>>`.
pub trait Index: Send + Sync {
    /// Index a document under `id`. Idempotent: re-inserting the same
    /// `(key-bearing document, id)` is a no-op, required by the online
    /// build protocol's "duplicate inserts are idempotent" rule.
    fn insert(&mut self, doc: &Document, id: ObjectId) -> Result<(), IndexError>;

    /// Remove `id` from the index, given the document it was last indexed
    /// under (needed to recompute the same key for removal).
    fn delete(&mut self, doc: &Document, id: ObjectId);

    /// Field paths this index projects keys from.
    fn field_paths(&self) -> &[String];

    /// Whether this index enforces key uniqueness.
    fn is_unique(&self) -> bool;

    /// Current statistics.
    fn stats(&self) -> IndexStats;

    /// Configured time-to-live in microseconds, for TTL indexes. `None`
    /// for every other kind (background reaper probe, spec.md §4.9).
    fn ttl_micros(&self) -> Option<u64> {
        None
    }

    /// Doc-ids whose projected key equals `key` exactly, for the query
    /// executor's index-seek fast path. `None` means this index kind
    /// doesn't support a direct point lookup (the executor falls back to a
    /// full scan); only `OrderedIndex` overrides this.
    fn point_lookup(&self, key: &IndexKey) -> Option<Vec<ObjectId>> {
        let _ = key;
        None
    }

    /// Run a kind-specific query (spec.md §4.2's `specialized_query(...)`).
    /// `None` for every index kind but `GeoIndex`/`TextIndex`, or when the
    /// query variant doesn't match this index's kind.
    fn specialized_query(&self, query: &SpecializedQuery) -> Option<SpecializedHits> {
        let _ = query;
        None
    }
}

impl Index for Box<dyn Index> {
    fn insert(&mut self, doc: &Document, id: ObjectId) -> Result<(), IndexError> {
        (**self).insert(doc, id)
    }

    fn delete(&mut self, doc: &Document, id: ObjectId) {
        (**self).delete(doc, id)
    }

    fn field_paths(&self) -> &[String] {
        (**self).field_paths()
    }

    fn is_unique(&self) -> bool {
        (**self).is_unique()
    }

    fn stats(&self) -> IndexStats {
        (**self).stats()
    }

    fn ttl_micros(&self) -> Option<u64> {
        (**self).ttl_micros()
    }

    fn point_lookup(&self, key: &IndexKey) -> Option<Vec<ObjectId>> {
        (**self).point_lookup(key)
    }

    fn specialized_query(&self, query: &SpecializedQuery) -> Option<SpecializedHits> {
        (**self).specialized_query(query)
    }
}
