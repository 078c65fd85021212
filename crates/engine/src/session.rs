//! Session & savepoints (spec.md §4.7): the user-facing transaction handle
//! layered on top of one `corvid_concurrency::TransactionContext`.
//!
//! A session defers mutation into an ordered operation list and a
//! per-collection snapshot cache, replaying the operations through the
//! ordinary `Collection` API only once the underlying transaction commits
//! (spec.md §4.7 "Commit"). Savepoints are deep-copy marks: each savepoint
//! clones the transaction's read/write/delete sets and the snapshot cache,
//! and rollback restores the clone wholesale.

use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::key::StorageKey;
use corvid_core::value::{Document, ObjectId, Value};
use corvid_concurrency::TransactionContext;
use std::collections::HashMap;

/// One deferred mutation, replayed against the collection on commit
/// (spec.md §4.7).
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert a new document.
    Insert {
        /// Resolved document id (assigned up front so reads within the
        /// session see it before commit).
        id: ObjectId,
        /// The document to insert.
        doc: Document,
    },
    /// Update an existing document.
    Update {
        /// Target document id.
        id: ObjectId,
        /// The update document (operator map) to apply.
        update: Document,
    },
    /// Delete a document.
    Delete {
        /// Target document id.
        id: ObjectId,
    },
}

/// A deep-copy savepoint: the session's mutable buffers, cloned as they
/// stood when the savepoint was created, plus the operations-list length
/// to truncate back to.
struct SavepointMark {
    name: String,
    operations_len: usize,
    read_set: HashMap<StorageKey, u64>,
    write_set: HashMap<StorageKey, Value>,
    delete_set: std::collections::HashSet<StorageKey>,
    snapshot_cache: HashMap<ObjectId, Document>,
}

/// A transaction handle scoped to one collection, with deferred operations,
/// a snapshot cache for repeatable reads, and named savepoints (spec.md §3,
/// §4.7).
pub struct Session {
    txn: TransactionContext,
    collection: String,
    operations: Vec<Operation>,
    snapshot_cache: HashMap<ObjectId, Document>,
    savepoints: Vec<SavepointMark>,
}

impl Session {
    /// Begin a session over a fresh transaction context.
    pub fn new(txn: TransactionContext) -> Self {
        let collection = txn.collection.clone();
        Session {
            txn,
            collection,
            operations: Vec::new(),
            snapshot_cache: HashMap::new(),
            savepoints: Vec::new(),
        }
    }

    /// The collection this session is scoped to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The underlying transaction context, for callers that need direct
    /// MVCC access (e.g. `TransactionManager::commit`).
    pub fn transaction(&mut self) -> &mut TransactionContext {
        &mut self.txn
    }

    fn ensure_active(&self) -> CorvidResult<()> {
        if self.txn.is_active() {
            Ok(())
        } else {
            Err(CorvidError::InactiveTransaction {
                state: self.txn.status.name(),
            })
        }
    }

    /// Read path (spec.md §4.7): pending operations in reverse order, then
    /// the snapshot cache, then the underlying MVCC-tracked read. The first
    /// MVCC read for an id is deep-copied into the snapshot cache so later
    /// reads of the same id are stable for the session's lifetime.
    pub fn read(&mut self, id: ObjectId) -> CorvidResult<Option<Document>> {
        self.ensure_active()?;
        for op in self.operations.iter().rev() {
            match op {
                Operation::Delete { id: op_id } if *op_id == id => return Ok(None),
                Operation::Insert { id: op_id, doc } if *op_id == id => return Ok(Some(doc.clone())),
                Operation::Update { id: op_id, .. } if *op_id == id => break,
                _ => continue,
            }
        }
        if let Some(doc) = self.snapshot_cache.get(&id) {
            return Ok(Some(doc.clone()));
        }

        let key = StorageKey::document(self.collection.clone(), id.as_bytes());
        let value = self.txn.get(&key)?;
        let doc = match value {
            Some(Value::Document(doc)) => Some(doc),
            Some(other) => return Err(CorvidError::Corrupt(format!("expected document, found {other:?}"))),
            None => None,
        };
        if let Some(doc) = &doc {
            self.snapshot_cache.insert(id, doc.clone());
        }
        Ok(doc)
    }

    /// Stage an insert: records the write with the MVCC manager for
    /// conflict tracking, then appends a deferred operation.
    pub fn insert(&mut self, mut doc: Document) -> CorvidResult<ObjectId> {
        self.ensure_active()?;
        let id = match doc.get("_id") {
            Some(Value::ObjectId(id)) => *id,
            Some(_) => return Err(CorvidError::invalid_argument("_id must be an ObjectId")),
            None => {
                let id = ObjectId::new();
                doc.set("_id", Value::ObjectId(id));
                id
            }
        };
        let key = StorageKey::document(self.collection.clone(), id.as_bytes());
        self.txn.put(key, Value::Document(doc.clone()))?;
        self.operations.push(Operation::Insert { id, doc });
        Ok(id)
    }

    /// Stage an update.
    pub fn update(&mut self, id: ObjectId, update_doc: Document) -> CorvidResult<()> {
        self.ensure_active()?;
        // Track as a read-then-write so commit-time validation sees this
        // key in the read set if it wasn't already touched.
        let key = StorageKey::document(self.collection.clone(), id.as_bytes());
        let _ = self.txn.get(&key)?;
        self.operations.push(Operation::Update { id, update: update_doc });
        self.snapshot_cache.remove(&id);
        Ok(())
    }

    /// Stage a delete.
    pub fn delete(&mut self, id: ObjectId) -> CorvidResult<()> {
        self.ensure_active()?;
        let key = StorageKey::document(self.collection.clone(), id.as_bytes());
        self.txn.delete(key)?;
        self.operations.push(Operation::Delete { id });
        self.snapshot_cache.remove(&id);
        Ok(())
    }

    /// Deferred operations pending replay, in commit order.
    pub fn pending_operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Create a named savepoint (spec.md §4.7). Fails with `AlreadyExists`
    /// if the name is already in use among this session's active
    /// savepoints.
    pub fn create_savepoint(&mut self, name: impl Into<String>) -> CorvidResult<()> {
        self.ensure_active()?;
        let name = name.into();
        if self.savepoints.iter().any(|s| s.name == name) {
            return Err(CorvidError::already_exists("savepoint", name));
        }
        self.savepoints.push(SavepointMark {
            name,
            operations_len: self.operations.len(),
            read_set: self.txn.read_set.clone(),
            write_set: self.txn.write_set.clone(),
            delete_set: self.txn.delete_set.clone(),
            snapshot_cache: self.snapshot_cache.clone(),
        });
        Ok(())
    }

    /// Roll back to a named savepoint: restores the transaction's read and
    /// write sets, truncates the operations list, restores the snapshot
    /// cache, and removes that savepoint and every one created after it
    /// (spec.md §4.7).
    pub fn rollback_to(&mut self, name: &str) -> CorvidResult<()> {
        self.ensure_active()?;
        let position = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CorvidError::not_found("savepoint", name))?;

        let mark = self.savepoints.split_off(position);
        let mark = mark.into_iter().next().expect("split_off at a valid position is non-empty");

        self.txn.read_set = mark.read_set;
        self.txn.write_set = mark.write_set;
        self.txn.delete_set = mark.delete_set;
        self.operations.truncate(mark.operations_len);
        self.snapshot_cache = mark.snapshot_cache;
        Ok(())
    }

    /// Forget a savepoint without rolling back to it (spec.md §4.7).
    pub fn release_savepoint(&mut self, name: &str) -> CorvidResult<()> {
        self.ensure_active()?;
        let position = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CorvidError::not_found("savepoint", name))?;
        self.savepoints.remove(position);
        Ok(())
    }

    /// Reset this session for reuse by a pool: clears operations and the
    /// snapshot cache in place (preserving backing capacity) and installs a
    /// fresh transaction context (spec.md §4.7 "session pool").
    pub fn reset(&mut self, txn: TransactionContext) {
        self.collection = txn.collection.clone();
        self.txn = txn;
        self.operations.clear();
        self.snapshot_cache.clear();
        self.savepoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(TransactionContext::new(1, "people", 0))
    }

    fn person(name: &str) -> Document {
        let mut d = Document::new();
        d.set("name", Value::String(name.to_string()));
        d
    }

    #[test]
    fn read_your_own_insert() {
        let mut s = session();
        let id = s.insert(person("Alice")).unwrap();
        let doc = s.read(id).unwrap().unwrap();
        assert_eq!(doc.get("name"), Some(&Value::String("Alice".into())));
    }

    #[test]
    fn delete_masks_earlier_insert() {
        let mut s = session();
        let id = s.insert(person("Alice")).unwrap();
        s.delete(id).unwrap();
        assert_eq!(s.read(id).unwrap(), None);
    }

    #[test]
    fn savepoint_rollback_discards_later_operations() {
        let mut s = session();
        let id1 = s.insert(person("Old")).unwrap();
        s.create_savepoint("s").unwrap();
        s.insert(person("New")).unwrap();
        assert_eq!(s.pending_operations().len(), 2);

        s.rollback_to("s").unwrap();
        assert_eq!(s.pending_operations().len(), 1);
        assert!(s.read(id1).unwrap().is_some());
    }

    #[test]
    fn rollback_removes_later_savepoints_too() {
        let mut s = session();
        s.create_savepoint("a").unwrap();
        s.insert(person("X")).unwrap();
        s.create_savepoint("b").unwrap();
        s.insert(person("Y")).unwrap();

        s.rollback_to("a").unwrap();
        assert!(s.rollback_to("b").is_err());
    }

    #[test]
    fn duplicate_savepoint_name_rejected() {
        let mut s = session();
        s.create_savepoint("s").unwrap();
        assert!(s.create_savepoint("s").is_err());
    }

    #[test]
    fn unknown_savepoint_name_not_found() {
        let mut s = session();
        assert!(s.rollback_to("nope").is_err());
        assert!(s.release_savepoint("nope").is_err());
    }

    #[test]
    fn operations_after_abort_fail() {
        let mut s = session();
        s.transaction().mark_aborted("test");
        assert!(s.insert(person("X")).is_err());
    }

    #[test]
    fn release_savepoint_forgets_without_rollback() {
        let mut s = session();
        s.insert(person("A")).unwrap();
        s.create_savepoint("s").unwrap();
        s.insert(person("B")).unwrap();
        s.release_savepoint("s").unwrap();
        assert_eq!(s.pending_operations().len(), 2);
        assert!(s.rollback_to("s").is_err());
    }

    #[test]
    fn reset_clears_operations_and_cache() {
        let mut s = session();
        s.insert(person("A")).unwrap();
        s.reset(TransactionContext::new(2, "people", 0));
        assert!(s.pending_operations().is_empty());
    }
}
