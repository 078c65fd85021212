//! TTL indexes: an ordered index on a timestamp field plus an expiry
//! duration, used by the background reaper to find documents past their
//! lifetime (spec.md §3, §4.8). Built on top of [`OrderedIndex`] rather than
//! a dedicated structure since "find documents whose timestamp field is
//! older than X" is exactly a bounded range scan.

use super::{Index, IndexError, IndexKey, IndexStats, OrderedIndex};
use corvid_core::value::{Document, ObjectId, Timestamp};

/// An ordered index over a single timestamp field, with an attached
/// time-to-live. `get_expired(now)` returns every document whose field value
/// is more than `ttl` in the past.
pub struct TtlIndex {
    inner: OrderedIndex,
    field_path: String,
    ttl_micros: u64,
}

impl TtlIndex {
    /// Build a TTL index over `field_path`, expiring documents `ttl_micros`
    /// microseconds after their recorded timestamp.
    pub fn new(field_path: impl Into<String>, ttl_micros: u64) -> Self {
        let field_path = field_path.into();
        TtlIndex {
            inner: OrderedIndex::new(format!("ttl:{field_path}"), vec![field_path.clone()], false),
            field_path,
            ttl_micros,
        }
    }

    /// Doc-ids whose indexed timestamp is more than the configured TTL
    /// before `now`.
    pub fn get_expired(&self, now: Timestamp) -> Vec<ObjectId> {
        let cutoff_micros = now.as_micros().saturating_sub(self.ttl_micros);
        let cutoff = IndexKey::from_value(&corvid_core::value::Value::Timestamp(Timestamp::from_micros(cutoff_micros)));
        self.inner.range(None, Some(&cutoff), true, true)
    }

    /// The field path this index watches.
    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    /// Configured time-to-live, in microseconds.
    pub fn ttl_micros(&self) -> u64 {
        self.ttl_micros
    }
}

impl Index for TtlIndex {
    fn insert(&mut self, doc: &Document, id: ObjectId) -> Result<(), IndexError> {
        self.inner.insert(doc, id)
    }

    fn delete(&mut self, doc: &Document, id: ObjectId) {
        self.inner.delete(doc, id)
    }

    fn field_paths(&self) -> &[String] {
        self.inner.field_paths()
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn stats(&self) -> IndexStats {
        self.inner.stats()
    }

    fn ttl_micros(&self) -> Option<u64> {
        Some(self.ttl_micros)
    }
}
