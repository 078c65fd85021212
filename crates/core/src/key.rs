//! Storage key scheme and collection-name validation.
//!
//! Physical storage (the MVCC key-value layer in `corvid-storage`) is keyed
//! by a single ordered [`StorageKey`] type so that prefix scans over a
//! collection's documents, or over one index's entries, are plain
//! lexicographic range scans. Ordering is derived field-by-field, the way
//! the storage layer's original namespace/type-tag/user-key scheme ordered
//! by (namespace, type_tag, user_key): here by (collection, kind, payload).

use crate::limits::Limits;
use thiserror::Error;

/// Reserved system prefix for internal collection names.
pub const RESERVED_PREFIX: &str = "_corvid/";

/// Validate a collection name using default limits.
pub fn validate_collection_name(name: &str) -> Result<(), KeyError> {
    validate_collection_name_with_limits(name, &Limits::default())
}

/// Validate a collection name with custom limits.
pub fn validate_collection_name_with_limits(name: &str, limits: &Limits) -> Result<(), KeyError> {
    if name.is_empty() {
        return Err(KeyError::Empty);
    }
    if name.contains('\x00') {
        return Err(KeyError::ContainsNul);
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(KeyError::ReservedPrefix);
    }
    let len = name.len();
    if len > limits.max_key_bytes {
        return Err(KeyError::TooLong {
            actual: len,
            max: limits.max_key_bytes,
        });
    }
    Ok(())
}

/// Collection-name validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Name is empty.
    #[error("collection name cannot be empty")]
    Empty,
    /// Name contains a NUL byte.
    #[error("collection name cannot contain NUL bytes")]
    ContainsNul,
    /// Name uses the reserved `_corvid/` prefix.
    #[error("collection name cannot use reserved prefix '{}'", RESERVED_PREFIX)]
    ReservedPrefix,
    /// Name exceeds the configured maximum length.
    #[error("collection name too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Which sub-space of a collection's key range a [`StorageKey`] falls in.
///
/// Declaration order is significant: it is the sort order of the `kind`
/// field within a collection, so all document keys for a collection sort
/// before all index-entry keys, which sort before its metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    /// A document, keyed by its `ObjectId` bytes.
    Document,
    /// One index's entries, identified by the index's name.
    Index,
    /// The collection's own catalogue metadata (schema, index list).
    Metadata,
}

/// A single ordered key into the MVCC storage layer.
///
/// Comparison and scanning both go through the derived `Ord`: keys sort by
/// `collection`, then `kind`, then `payload` bytes. A prefix scan for "all
/// documents in `orders`" is `StorageKey::document_prefix("orders")`; a
/// prefix scan for one index's entries is
/// `StorageKey::index_prefix("orders", "by_email")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey {
    /// Owning collection name.
    pub collection: String,
    /// Which sub-space this key belongs to.
    pub kind: KeyKind,
    /// Kind-specific payload: the document id bytes for `Document` keys, or
    /// `index_name \0 encoded_index_key \0 doc_id` for `Index` keys.
    pub payload: Vec<u8>,
}

impl StorageKey {
    /// Key for a single document.
    pub fn document(collection: impl Into<String>, id_bytes: &[u8; 12]) -> Self {
        StorageKey {
            collection: collection.into(),
            kind: KeyKind::Document,
            payload: id_bytes.to_vec(),
        }
    }

    /// Prefix matching every document key in `collection`.
    pub fn document_prefix(collection: impl Into<String>) -> Self {
        StorageKey {
            collection: collection.into(),
            kind: KeyKind::Document,
            payload: Vec::new(),
        }
    }

    /// Key for one entry in a named index: `encoded_key` is the index's
    /// own sort-order-preserving encoding of the indexed field(s), and
    /// `doc_id` breaks ties between documents that project to equal keys.
    pub fn index_entry(
        collection: impl Into<String>,
        index_name: &str,
        encoded_key: &[u8],
        doc_id: &[u8; 12],
    ) -> Self {
        let mut payload = Vec::with_capacity(index_name.len() + 1 + encoded_key.len() + 1 + 12);
        payload.extend_from_slice(index_name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(encoded_key);
        payload.push(0);
        payload.extend_from_slice(doc_id);
        StorageKey {
            collection: collection.into(),
            kind: KeyKind::Index,
            payload,
        }
    }

    /// Prefix matching every entry of one named index.
    pub fn index_prefix(collection: impl Into<String>, index_name: &str) -> Self {
        let mut payload = Vec::with_capacity(index_name.len() + 1);
        payload.extend_from_slice(index_name.as_bytes());
        payload.push(0);
        StorageKey {
            collection: collection.into(),
            kind: KeyKind::Index,
            payload,
        }
    }

    /// Key for a collection's own catalogue metadata.
    pub fn metadata(collection: impl Into<String>) -> Self {
        StorageKey {
            collection: collection.into(),
            kind: KeyKind::Metadata,
            payload: Vec::new(),
        }
    }

    /// Whether `self` is a prefix of `other` under the derived byte order:
    /// same collection and kind, and `other`'s payload starts with ours.
    pub fn is_prefix_of(&self, other: &StorageKey) -> bool {
        self.collection == other.collection
            && self.kind == other.kind
            && other.payload.starts_with(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_collection_names() {
        assert!(validate_collection_name("orders").is_ok());
        assert!(validate_collection_name("user_accounts").is_ok());
        assert!(validate_collection_name("日本語").is_ok());
    }

    #[test]
    fn rejects_empty_nul_and_reserved() {
        assert_eq!(validate_collection_name(""), Err(KeyError::Empty));
        assert_eq!(
            validate_collection_name("a\0b"),
            Err(KeyError::ContainsNul)
        );
        assert_eq!(
            validate_collection_name("_corvid/system"),
            Err(KeyError::ReservedPrefix)
        );
    }

    #[test]
    fn rejects_too_long() {
        let limits = Limits {
            max_key_bytes: 4,
            ..Limits::default()
        };
        assert_eq!(
            validate_collection_name_with_limits("toolong", &limits),
            Err(KeyError::TooLong { actual: 7, max: 4 })
        );
    }

    #[test]
    fn document_keys_sort_before_index_keys_in_same_collection() {
        let doc_key = StorageKey::document("orders", &[0u8; 12]);
        let idx_key = StorageKey::index_entry("orders", "by_email", b"a", &[0u8; 12]);
        assert!(doc_key < idx_key);
    }

    #[test]
    fn keys_sort_by_collection_first() {
        let a = StorageKey::document("a_collection", &[0u8; 12]);
        let b = StorageKey::document("b_collection", &[0u8; 12]);
        assert!(a < b);
    }

    #[test]
    fn document_prefix_matches_only_its_collection() {
        let prefix = StorageKey::document_prefix("orders");
        let in_orders = StorageKey::document("orders", &[1u8; 12]);
        let in_other = StorageKey::document("other", &[1u8; 12]);
        assert!(prefix.is_prefix_of(&in_orders));
        assert!(!prefix.is_prefix_of(&in_other));
    }

    #[test]
    fn index_prefix_does_not_match_other_indexes() {
        let prefix = StorageKey::index_prefix("orders", "by_email");
        let matching = StorageKey::index_entry("orders", "by_email", b"x", &[2u8; 12]);
        let other_index = StorageKey::index_entry("orders", "by_name", b"x", &[2u8; 12]);
        assert!(prefix.is_prefix_of(&matching));
        assert!(!prefix.is_prefix_of(&other_index));
    }
}
