//! Snapshot isolation for transactions.
//!
//! A transaction's snapshot provides:
//! - Committed data as of `start_version`
//! - A consistent point-in-time view (repeatable reads)
//!
//! It never shows writes committed after `start_version`, uncommitted
//! writes from other transactions, or partial writes.
//!
//! `ClonedSnapshotView` takes a deep copy of the collection's key range at
//! snapshot creation time. This trades memory and snapshot-creation time for
//! simplicity; collections in this engine have modest working sets and
//! short-lived transactions, so the copy is cheap in practice. The
//! `SnapshotView` trait in `corvid_core` is the seam a lazier,
//! version-bounded implementation could slot into later without touching
//! callers.

use corvid_core::error::CorvidResult;
use corvid_core::key::StorageKey;
use corvid_core::traits::{SnapshotView, VersionedValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A snapshot built by cloning a bounded view of storage at a point in time.
pub struct ClonedSnapshotView {
    version: u64,
    data: Arc<BTreeMap<StorageKey, VersionedValue>>,
}

impl ClonedSnapshotView {
    /// Build a snapshot owning the given data.
    pub fn new(version: u64, data: BTreeMap<StorageKey, VersionedValue>) -> Self {
        ClonedSnapshotView {
            version,
            data: Arc::new(data),
        }
    }

    /// An empty snapshot at the given version (used for brand-new
    /// collections with nothing committed yet).
    pub fn empty(version: u64) -> Self {
        ClonedSnapshotView {
            version,
            data: Arc::new(BTreeMap::new()),
        }
    }

    /// Number of keys visible in this snapshot.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this snapshot has no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl SnapshotView for ClonedSnapshotView {
    fn get(&self, key: &StorageKey) -> CorvidResult<Option<VersionedValue>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &StorageKey) -> CorvidResult<Vec<(StorageKey, VersionedValue)>> {
        Ok(self
            .data
            .iter()
            .filter(|(k, _)| prefix.is_prefix_of(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::value::Value;

    #[test]
    fn empty_snapshot_has_no_keys() {
        let snap = ClonedSnapshotView::empty(7);
        assert_eq!(snap.version(), 7);
        assert!(snap.is_empty());
        let prefix = StorageKey::document_prefix("orders");
        assert!(snap.scan_prefix(&prefix).unwrap().is_empty());
    }

    #[test]
    fn scan_prefix_filters_by_collection_and_kind() {
        let mut data = BTreeMap::new();
        let key1 = StorageKey::document("orders", &[1u8; 12]);
        let key2 = StorageKey::document("orders", &[2u8; 12]);
        let key3 = StorageKey::document("other", &[1u8; 12]);
        data.insert(key1.clone(), VersionedValue::new(Value::I64(1), 1));
        data.insert(key2.clone(), VersionedValue::new(Value::I64(2), 1));
        data.insert(key3, VersionedValue::new(Value::I64(3), 1));

        let snap = ClonedSnapshotView::new(1, data);
        let prefix = StorageKey::document_prefix("orders");
        let mut results = snap.scan_prefix(&prefix).unwrap();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, key1);
        assert_eq!(results[1].0, key2);
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let snap = ClonedSnapshotView::empty(1);
        let key = StorageKey::document("orders", &[9u8; 12]);
        assert!(snap.get(&key).unwrap().is_none());
    }
}
