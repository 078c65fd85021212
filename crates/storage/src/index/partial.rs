//! Partial indexes: any index wrapped with a predicate gate (spec.md §3,
//! §4.2). Only documents that satisfy the filter are maintained in the
//! wrapped index; others are silently skipped, and a document that
//! transitions across the predicate boundary on update is picked up or
//! dropped correctly because `delete` is keyed on the previous document,
//! `insert` on the new one.

use super::{Index, IndexError, IndexStats};
use corvid_core::value::{Document, ObjectId, Value};
use std::sync::Arc;

/// A boolean predicate evaluated against a candidate document. Expressed as
/// a boxed closure rather than a filter-expression AST: the collection layer
/// compiles whatever filter syntax it accepts down to this before handing it
/// to the index, keeping the index crate free of query-language concerns.
pub type Predicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Wraps an inner index so only documents matching `filter` are indexed.
pub struct PartialIndex<I: Index> {
    inner: I,
    filter: Predicate,
    /// Tracks which documents currently pass the filter, so an `insert` call
    /// for a document that no longer matches can still clean up correctly
    /// even without re-evaluating the old document.
    matched: std::collections::HashSet<ObjectId>,
}

impl<I: Index> PartialIndex<I> {
    /// Wrap `inner` with `filter`. `filter` is an opaque closure, so there is
    /// no way to tell here whether it can ever match — spec.md's "empty
    /// filter fails with *InvalidArgument*" rule is enforced one layer up,
    /// in [`PartialIndex::from_equality_filter`], which sees the filter as
    /// structured `(path, value)` requirements before it gets boxed into a
    /// closure. This constructor always succeeds.
    pub fn new(inner: I, filter: Predicate) -> Result<Self, IndexError> {
        Ok(PartialIndex {
            inner,
            filter,
            matched: std::collections::HashSet::new(),
        })
    }

    /// Build from a filter represented as a set of required (path, value)
    /// equalities — the common case (`{status: "active"}`) and the one the
    /// collection layer reaches for when compiling `{status: {"$eq": ...}}`
    /// filters passed to `create_index`.
    pub fn from_equality_filter(
        inner: I,
        requirements: Vec<(String, Value)>,
    ) -> Result<Self, IndexError> {
        if requirements.is_empty() {
            return Err(IndexError::EmptyPartialFilter);
        }
        let filter: Predicate = Arc::new(move |doc: &Document| {
            requirements
                .iter()
                .all(|(path, expected)| doc.get_path(path) == Some(expected))
        });
        PartialIndex::new(inner, filter)
    }

    /// The wrapped index, for read access to its range/point queries.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Whether `doc` currently satisfies the partial filter.
    pub fn matches(&self, doc: &Document) -> bool {
        (self.filter)(doc)
    }
}

impl<I: Index> Index for PartialIndex<I> {
    fn insert(&mut self, doc: &Document, id: ObjectId) -> Result<(), IndexError> {
        if self.matches(doc) {
            self.inner.insert(doc, id)?;
            self.matched.insert(id);
        } else if self.matched.remove(&id) {
            self.inner.delete(doc, id);
        }
        Ok(())
    }

    fn delete(&mut self, doc: &Document, id: ObjectId) {
        if self.matched.remove(&id) {
            self.inner.delete(doc, id);
        }
    }

    fn field_paths(&self) -> &[String] {
        self.inner.field_paths()
    }

    fn is_unique(&self) -> bool {
        self.inner.is_unique()
    }

    fn stats(&self) -> IndexStats {
        self.inner.stats()
    }

    fn ttl_micros(&self) -> Option<u64> {
        self.inner.ttl_micros()
    }
}
