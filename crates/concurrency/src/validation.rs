//! Commit-time conflict validation.
//!
//! Validation is read-set based, first-committer-wins:
//!
//! - A transaction conflicts if any key in its read set (including keys
//!   only touched by a prefix scan) now has a different version in storage
//!   than the version observed when the transaction read it.
//! - Blind writes — keys written without ever being read — do NOT
//!   conflict with each other. Two transactions can blindly overwrite the
//!   same key and both succeed (write skew on blind writes is allowed by
//!   design: only reads establish the dependency that commit-time
//!   validation protects).

use corvid_core::key::StorageKey;
use corvid_core::traits::Storage;
use std::collections::HashMap;

/// One read-write conflict found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteConflict {
    /// The key whose version changed.
    pub key: StorageKey,
    /// Version observed when the transaction read this key.
    pub read_version: u64,
    /// Version found in storage at validation time.
    pub current_version: u64,
}

/// Outcome of validating one transaction's read set against storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    conflicts: Vec<ReadWriteConflict>,
}

impl ValidationResult {
    /// Whether any conflict was found.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Number of conflicting keys.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// All conflicts found, in no particular order.
    pub fn conflicts(&self) -> &[ReadWriteConflict] {
        &self.conflicts
    }

    /// A debug rendering of the first conflicting key, or `"<unknown>"` if
    /// there were none — used to populate `CorvidError::Conflict`.
    pub fn first_conflicting_key_debug(&self) -> String {
        self.conflicts
            .first()
            .map(|c| format!("{:?}", c.key))
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// Validate `read_set` against `store`'s current state.
///
/// For each `(key, read_version)`, the key's current version in storage is
/// looked up (0 if absent, matching the read-set's "didn't exist"
/// sentinel). A mismatch is a conflict.
pub fn validate_transaction<S: Storage>(
    read_set: &HashMap<StorageKey, u64>,
    store: &S,
) -> ValidationResult {
    let mut conflicts = Vec::new();
    for (key, &read_version) in read_set {
        let current_version = match store.get(key) {
            Ok(Some(versioned)) => versioned.version,
            Ok(None) => 0,
            Err(_) => {
                // Treat a storage error as a conservative conflict: we
                // cannot prove the read is still valid.
                conflicts.push(ReadWriteConflict {
                    key: key.clone(),
                    read_version,
                    current_version: u64::MAX,
                });
                continue;
            }
        };
        if current_version != read_version {
            conflicts.push(ReadWriteConflict {
                key: key.clone(),
                read_version,
                current_version,
            });
        }
    }
    ValidationResult { conflicts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::error::CorvidResult;
    use corvid_core::value::Value;
    use parking_lot::RwLock;
    use std::collections::HashMap as StdHashMap;

    struct FakeStore {
        data: RwLock<StdHashMap<StorageKey, u64>>,
    }

    impl Storage for FakeStore {
        fn get(&self, key: &StorageKey) -> CorvidResult<Option<corvid_core::traits::VersionedValue>> {
            Ok(self
                .data
                .read()
                .get(key)
                .map(|&v| corvid_core::traits::VersionedValue::new(Value::Null, v)))
        }
        fn get_versioned(
            &self,
            key: &StorageKey,
            _max_version: u64,
        ) -> CorvidResult<Option<corvid_core::traits::VersionedValue>> {
            self.get(key)
        }
        fn put(&self, key: StorageKey, _value: Value, version: u64) -> CorvidResult<()> {
            self.data.write().insert(key, version);
            Ok(())
        }
        fn delete(
            &self,
            key: &StorageKey,
            _version: u64,
        ) -> CorvidResult<Option<corvid_core::traits::VersionedValue>> {
            self.data.write().remove(key);
            Ok(None)
        }
        fn scan_prefix(
            &self,
            _prefix: &StorageKey,
            _max_version: u64,
        ) -> CorvidResult<Vec<(StorageKey, corvid_core::traits::VersionedValue)>> {
            Ok(Vec::new())
        }
        fn current_version(&self) -> u64 {
            self.data.read().values().copied().max().unwrap_or(0)
        }
    }

    fn key(id: u8) -> StorageKey {
        StorageKey::document("orders", &[id; 12])
    }

    #[test]
    fn no_conflict_when_versions_match() {
        let store = FakeStore {
            data: RwLock::new(StdHashMap::from([(key(1), 5)])),
        };
        let mut read_set = HashMap::new();
        read_set.insert(key(1), 5);
        let result = validate_transaction(&read_set, &store);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn conflict_when_version_changed() {
        let store = FakeStore {
            data: RwLock::new(StdHashMap::from([(key(1), 6)])),
        };
        let mut read_set = HashMap::new();
        read_set.insert(key(1), 5);
        let result = validate_transaction(&read_set, &store);
        assert!(result.has_conflicts());
        assert_eq!(result.conflict_count(), 1);
    }

    #[test]
    fn conflict_when_key_deleted_since_read() {
        let store = FakeStore {
            data: RwLock::new(StdHashMap::new()),
        };
        let mut read_set = HashMap::new();
        read_set.insert(key(1), 5);
        let result = validate_transaction(&read_set, &store);
        assert!(result.has_conflicts());
    }

    #[test]
    fn no_conflict_when_key_absent_both_times() {
        let store = FakeStore {
            data: RwLock::new(StdHashMap::new()),
        };
        let mut read_set = HashMap::new();
        read_set.insert(key(1), 0);
        let result = validate_transaction(&read_set, &store);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn blind_write_without_read_has_no_conflict() {
        // A key that was only written, never read, doesn't appear in the
        // read set at all, so validation can't and doesn't flag it.
        let store = FakeStore {
            data: RwLock::new(StdHashMap::from([(key(1), 99)])),
        };
        let read_set = HashMap::new();
        let result = validate_transaction(&read_set, &store);
        assert!(!result.has_conflicts());
    }
}
