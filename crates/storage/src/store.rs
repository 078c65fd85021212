//! In-memory MVCC key-value store backing the collection and document layers.
//!
//! `MvccStore` implements `corvid_core::traits::Storage`: every `put` appends
//! a new version to a per-key chain rather than overwriting in place, so
//! snapshot reads taken before a write keep seeing their own version.
//! Keys are sharded across a `DashMap`, matching the teacher's
//! `ShardedStore` (lock-free reads, per-key write locking) generalized from
//! per-branch partitioning to the `StorageKey`'s own (collection, kind,
//! payload) ordering.

use corvid_core::error::CorvidResult;
use corvid_core::key::StorageKey;
use corvid_core::traits::{SnapshotView, Storage, VersionedValue};
use corvid_core::value::Value;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// One version in a key's history. `value: None` is a tombstone.
#[derive(Debug, Clone)]
struct StoredVersion {
    value: Option<Value>,
    version: u64,
}

/// A key's version history, newest first.
#[derive(Debug, Default)]
struct VersionChain {
    versions: VecDeque<StoredVersion>,
}

impl VersionChain {
    fn push(&mut self, value: Option<Value>, version: u64) {
        self.versions.push_front(StoredVersion { value, version });
    }

    fn latest(&self) -> Option<&StoredVersion> {
        self.versions.front()
    }

    fn at_or_before(&self, max_version: u64) -> Option<&StoredVersion> {
        self.versions.iter().find(|v| v.version <= max_version)
    }
}

/// Sharded, version-retaining key-value store.
///
/// One process-wide instance typically backs every collection: keys already
/// carry their owning collection name, so a prefix scan for one collection
/// never touches another's entries.
pub struct MvccStore {
    shards: DashMap<StorageKey, VersionChain>,
    version: AtomicU64,
}

impl Default for MvccStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MvccStore {
    /// An empty store at version 0.
    pub fn new() -> Self {
        MvccStore {
            shards: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// Resume from a previously observed version (e.g. after restoring a
    /// backup that recorded the source database's watermark).
    pub fn with_version(version: u64) -> Self {
        MvccStore {
            shards: DashMap::new(),
            version: AtomicU64::new(version),
        }
    }

    /// Total number of keys with any live (non-tombstone) version, across
    /// every collection. O(n); intended for diagnostics, not hot paths.
    pub fn live_key_count(&self) -> usize {
        self.shards
            .iter()
            .filter(|e| e.value().latest().map(|v| v.value.is_some()).unwrap_or(false))
            .count()
    }

    /// Drop every key belonging to `collection`. Used when a collection is
    /// dropped so its storage footprint doesn't linger.
    pub fn clear_collection(&self, collection: &str) {
        self.shards.retain(|k, _| k.collection != collection);
    }

    /// Build a version-bounded snapshot by cloning every live entry at or
    /// before the store's current version. Mirrors the teacher's
    /// `ClonedSnapshotView` construction strategy: deep-copy now, immutable
    /// thereafter.
    pub fn snapshot(&self) -> MvccSnapshot {
        let version = self.current_version();
        let mut data = BTreeMap::new();
        for entry in self.shards.iter() {
            if let Some(found) = entry.value().at_or_before(version) {
                if let Some(value) = &found.value {
                    data.insert(
                        entry.key().clone(),
                        VersionedValue::new(value.clone(), found.version),
                    );
                }
            }
        }
        MvccSnapshot { version, data }
    }
}

/// A cloned, version-bounded read view built directly from an `MvccStore`.
pub struct MvccSnapshot {
    version: u64,
    data: BTreeMap<StorageKey, VersionedValue>,
}

impl SnapshotView for MvccSnapshot {
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

impl Storage for MvccStore {
    fn get(&self, key: &StorageKey) -> CorvidResult<Option<VersionedValue>> {
        Ok(self.shards.get(key).and_then(|chain| {
            chain
                .latest()
                .and_then(|v| v.value.clone().map(|val| VersionedValue::new(val, v.version)))
        }))
    }

    fn get_versioned(&self, key: &StorageKey, max_version: u64) -> CorvidResult<Option<VersionedValue>> {
        Ok(self.shards.get(key).and_then(|chain| {
            chain
                .at_or_before(max_version)
                .and_then(|v| v.value.clone().map(|val| VersionedValue::new(val, v.version)))
        }))
    }

    fn put(&self, key: StorageKey, value: Value, version: u64) -> CorvidResult<()> {
        self.shards
            .entry(key)
            .or_default()
            .push(Some(value), version);
        self.bump_version(version);
        Ok(())
    }

    fn delete(&self, key: &StorageKey, version: u64) -> CorvidResult<Option<VersionedValue>> {
        let prior = self.get(key)?;
        self.shards
            .entry(key.clone())
            .or_default()
            .push(None, version);
        self.bump_version(version);
        Ok(prior)
    }

    fn scan_prefix(&self, prefix: &StorageKey, max_version: u64) -> CorvidResult<Vec<(StorageKey, VersionedValue)>> {
        let mut out: Vec<(StorageKey, VersionedValue)> = self
            .shards
            .iter()
            .filter(|e| prefix.is_prefix_of(e.key()))
            .filter_map(|e| {
                e.value()
                    .at_or_before(max_version)
                    .and_then(|v| v.value.clone().map(|val| (e.key().clone(), VersionedValue::new(val, v.version))))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl MvccStore {
    fn bump_version(&self, version: u64) {
        self.version.fetch_max(version, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u8) -> StorageKey {
        StorageKey::document("orders", &[id; 12])
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = MvccStore::new();
        store.put(key(1), Value::I64(5), 1).unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), Some(VersionedValue::new(Value::I64(5), 1)));
    }

    #[test]
    fn put_never_overwrites_older_version() {
        let store = MvccStore::new();
        store.put(key(1), Value::I64(1), 1).unwrap();
        store.put(key(1), Value::I64(2), 2).unwrap();
        assert_eq!(store.get_versioned(&key(1), 1).unwrap(), Some(VersionedValue::new(Value::I64(1), 1)));
        assert_eq!(store.get_versioned(&key(1), 2).unwrap(), Some(VersionedValue::new(Value::I64(2), 2)));
    }

    #[test]
    fn delete_leaves_a_tombstone() {
        let store = MvccStore::new();
        store.put(key(1), Value::I64(1), 1).unwrap();
        let prior = store.delete(&key(1), 2).unwrap();
        assert_eq!(prior, Some(VersionedValue::new(Value::I64(1), 1)));
        assert_eq!(store.get(&key(1)).unwrap(), None);
        assert_eq!(store.get_versioned(&key(1), 1).unwrap(), Some(VersionedValue::new(Value::I64(1), 1)));
    }

    #[test]
    fn scan_prefix_orders_by_key_and_skips_tombstones() {
        let store = MvccStore::new();
        store.put(key(2), Value::I64(2), 1).unwrap();
        store.put(key(1), Value::I64(1), 2).unwrap();
        store.put(key(3), Value::I64(3), 3).unwrap();
        store.delete(&key(3), 4).unwrap();

        let results = store
            .scan_prefix(&StorageKey::document_prefix("orders"), store.current_version())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, key(1));
        assert_eq!(results[1].0, key(2));
    }

    #[test]
    fn clear_collection_drops_only_its_keys() {
        let store = MvccStore::new();
        store.put(key(1), Value::I64(1), 1).unwrap();
        store
            .put(StorageKey::document("other", &[1u8; 12]), Value::I64(9), 2)
            .unwrap();
        store.clear_collection("orders");
        assert_eq!(store.get(&key(1)).unwrap(), None);
        assert!(store
            .get(&StorageKey::document("other", &[1u8; 12]))
            .unwrap()
            .is_some());
    }

    #[test]
    fn snapshot_is_stable_across_later_writes() {
        let store = MvccStore::new();
        store.put(key(1), Value::I64(1), 1).unwrap();
        let snap = store.snapshot();
        store.put(key(1), Value::I64(2), 2).unwrap();
        assert_eq!(snap.get(&key(1)).unwrap(), Some(VersionedValue::new(Value::I64(1), 1)));
    }
}
