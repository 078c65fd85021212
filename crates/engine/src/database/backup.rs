//! Backup and restore (spec.md §6): a versioned JSON envelope capturing
//! every collection's documents and index catalogue, walking the
//! collection registry and each collection's document store directly
//! (bypassing the transaction layer — a backup is a point-in-time copy of
//! materialized state, not a committed transaction).
//!
//! The on-disk byte layout of this envelope is, per spec.md §1/§6, an
//! external collaborator's concern; this module defines and satisfies the
//! *contract* (the JSON shape below) without prescribing how a host
//! application stores or transmits the resulting bytes.

use super::Database;
use crate::collection::IndexSpec;
use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::value::Document;
use corvid_storage::index::IndexKind;
use serde::{Deserialize, Serialize};

/// One index's backed-up catalogue metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBackup {
    /// Index name.
    pub name: String,
    /// `btree | text | geo | ttl`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Field paths the index projects keys from.
    pub field_paths: Vec<String>,
    /// Whether the index enforces key uniqueness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// `2d | 2dsphere`, for geo indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_type: Option<String>,
    /// Time-to-live, in seconds, for TTL indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_duration: Option<u64>,
}

/// One collection's backed-up documents and indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionBackup {
    /// Collection name.
    pub name: String,
    /// Every document, in document-store iteration order.
    pub documents: Vec<Document>,
    /// Index catalogue entries.
    pub indexes: Vec<IndexBackup>,
}

/// The full backup envelope (spec.md §6's versioned JSON envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEnvelope {
    /// Envelope format version.
    pub version: u32,
    /// Source database name, informational only.
    pub database_name: String,
    /// Every collection's contents.
    pub collections: Vec<CollectionBackup>,
}

/// Options controlling `restore_from` (spec.md §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Drop any existing collection with a colliding name before restoring.
    pub drop_existing: bool,
    /// Skip rebuilding indexes; restore documents only.
    pub skip_indexes: bool,
}

const ENVELOPE_VERSION: u32 = 1;

impl Database {
    /// Capture every open collection's documents and index catalogue into
    /// a backup envelope.
    pub fn backup(&self, database_name: impl Into<String>) -> CorvidResult<BackupEnvelope> {
        let mut collections = Vec::new();
        for name in self.list_collections() {
            let collection = self.collection(&name)?;
            let documents = collection.find(&Document::new(), &crate::query::QueryOptions::default())?;
            let indexes = collection
                .index_catalog()
                .into_iter()
                .map(|entry| IndexBackup {
                    name: entry.name,
                    kind: index_kind_tag(entry.kind).to_string(),
                    field_paths: entry.field_paths.clone(),
                    unique: Some(entry.unique),
                    geo_type: match entry.kind {
                        IndexKind::Geo2d => Some("2d".to_string()),
                        IndexKind::Geo2dSphere => Some("2dsphere".to_string()),
                        _ => None,
                    },
                    ttl_duration: entry.ttl_micros.map(|micros| micros / 1_000_000),
                })
                .collect();
            collections.push(CollectionBackup { name, documents, indexes });
        }
        Ok(BackupEnvelope { version: ENVELOPE_VERSION, database_name: database_name.into(), collections })
    }

    /// Restore every collection in `envelope` into this database.
    pub fn restore(&self, envelope: &BackupEnvelope, options: RestoreOptions) -> CorvidResult<()> {
        for collection_backup in &envelope.collections {
            if options.drop_existing && self.list_collections().contains(&collection_backup.name) {
                self.drop_collection(&collection_backup.name)?;
            }
            let collection = self.collection(&collection_backup.name)?;
            for doc in &collection_backup.documents {
                collection.insert_one(doc.clone())?;
            }
            if !options.skip_indexes {
                for index in &collection_backup.indexes {
                    if index.name == "_id_" {
                        continue;
                    }
                    let spec = index_spec_from_backup(index)?;
                    collection.create_index(index.name.clone(), spec)?;
                }
            }
        }
        Ok(())
    }
}

fn index_kind_tag(kind: IndexKind) -> &'static str {
    match kind {
        IndexKind::Ordered => "btree",
        IndexKind::Text => "text",
        IndexKind::Geo2d | IndexKind::Geo2dSphere => "geo",
        IndexKind::Ttl => "ttl",
    }
}

fn index_spec_from_backup(index: &IndexBackup) -> CorvidResult<IndexSpec> {
    match index.kind.as_str() {
        "btree" => Ok(IndexSpec::Ordered {
            field_paths: index.field_paths.clone(),
            unique: index.unique.unwrap_or(false),
        }),
        "text" => Ok(IndexSpec::Text { field_paths: index.field_paths.clone() }),
        "geo" => {
            let field_path = index
                .field_paths
                .first()
                .cloned()
                .ok_or_else(|| CorvidError::invalid_argument("geo index requires exactly one field path"))?;
            match index.geo_type.as_deref() {
                Some("2d") => Ok(IndexSpec::Geo2d { field_path }),
                Some("2dsphere") => Ok(IndexSpec::Geo2dSphere { field_path }),
                _ => Err(CorvidError::invalid_argument("geo index requires geo_type of 2d or 2dsphere")),
            }
        }
        "ttl" => {
            let field_path = index
                .field_paths
                .first()
                .cloned()
                .ok_or_else(|| CorvidError::invalid_argument("ttl index requires a field path"))?;
            let ttl_duration = index
                .ttl_duration
                .ok_or_else(|| CorvidError::invalid_argument("ttl index requires ttl_duration"))?;
            Ok(IndexSpec::Ttl { field_path, ttl_micros: ttl_duration * 1_000_000 })
        }
        other => Err(CorvidError::invalid_argument(format!("unknown index type on restore: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::value::Value;

    #[test]
    fn backup_then_restore_round_trips_documents() {
        let source = Database::open_ephemeral();
        let col = source.create_collection("people").unwrap();
        let mut doc = Document::new();
        doc.set("name", Value::String("Ada".to_string()));
        col.insert_one(doc).unwrap();
        col.create_index("by_name", IndexSpec::Ordered { field_paths: vec!["name".to_string()], unique: false })
            .unwrap();

        let envelope = source.backup("source").unwrap();

        let target = Database::open_ephemeral();
        target.restore(&envelope, RestoreOptions::default()).unwrap();

        let restored = target.collection("people").unwrap();
        let found = restored.find_one(&Document::new()).unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&Value::String("Ada".to_string())));
        assert!(restored.list_indexes().iter().any(|(n, _, _)| n == "by_name"));
    }

    #[test]
    fn restore_unknown_index_kind_is_invalid_argument() {
        let bad = IndexBackup {
            name: "x".to_string(),
            kind: "bogus".to_string(),
            field_paths: vec!["a".to_string()],
            unique: None,
            geo_type: None,
            ttl_duration: None,
        };
        assert!(matches!(index_spec_from_backup(&bad), Err(CorvidError::InvalidArgument(_))));
    }
}
