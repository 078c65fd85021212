//! # Corvid
//!
//! An embedded, document-oriented database engine with MVCC transactions
//! and online secondary indexes.
//!
//! Corvid gives a host process collections of JSON-like documents, a query
//! and update executor, snapshot-isolated transactions with nested
//! savepoints, and a background worker pool for online index builds and
//! TTL reaping — all without a server process.
//!
//! # Quick Start
//!
//! ```no_run
//! use corvid::{Database, Document, IndexSpec, Value};
//!
//! let db = Database::open_ephemeral();
//! let people = db.collection("people")?;
//!
//! let mut ada = Document::new();
//! ada.set("name", Value::String("Ada Lovelace".to_string()));
//! ada.set("born", Value::I64(1815));
//! let id = people.insert_one(ada)?;
//!
//! people.create_index("by_born", IndexSpec::Ordered {
//!     field_paths: vec!["born".to_string()],
//!     unique: false,
//! })?;
//!
//! let found = people.find_by_id(&id)?;
//! assert_eq!(found.get("name"), Some(&Value::String("Ada Lovelace".to_string())));
//! # Ok::<(), corvid::CorvidError>(())
//! ```
//!
//! # Layers
//!
//! | Layer | Crate | Covers |
//! |-------|-------|--------|
//! | Document model | `corvid-core` | `Value`, `Document`, `ObjectId`, `Timestamp`, storage keys, errors |
//! | Storage | `corvid-storage` | the document store, the page manager, the index family |
//! | Concurrency | `corvid-concurrency` | the MVCC version store, transaction contexts, the transaction manager |
//! | Engine | `corvid-engine` | collections, the query/update executor, sessions, the worker pool, `Database` |
//!
//! Each layer's internals stay in its own crate; this crate re-exports only
//! the surface a host application needs to open a database, work with
//! collections, and run transactions.

#![warn(missing_docs)]

pub use corvid_core::error::{CorvidError, CorvidResult};
pub use corvid_core::key::{KeyKind, StorageKey};
pub use corvid_core::value::{Document, ObjectId, Timestamp, Value};

pub use corvid_engine::{
    AuditSink, Collection, CollectionStats, CursorId, CursorManager, Database, DatabaseBuilder,
    DatabaseConfig, DatabaseStats, IndexCatalogEntry, IndexSpec, Operation, Plan, Predicate,
    QueryOptions, Session, Task, WorkerPool, WorkerPoolStats,
};
pub use corvid_engine::database::backup::{BackupEnvelope, CollectionBackup, IndexBackup, RestoreOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_start_round_trips_a_document() {
        let db = Database::open_ephemeral();
        let people = db.collection("people").unwrap();

        let mut ada = Document::new();
        ada.set("name", Value::String("Ada Lovelace".to_string()));
        let id = people.insert_one(ada).unwrap();

        let found = people.find_by_id(&id).unwrap();
        assert_eq!(found.get("name"), Some(&Value::String("Ada Lovelace".to_string())));
    }

    #[test]
    fn backup_envelope_is_reachable_through_the_facade() {
        let db = Database::open_ephemeral();
        db.create_collection("people").unwrap();
        let envelope: BackupEnvelope = db.backup("people-db").unwrap();
        assert_eq!(envelope.database_name, "people-db");
    }
}
