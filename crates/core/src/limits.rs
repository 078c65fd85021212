//! Size limits enforced on documents and collection names.
//!
//! Defaults are deliberately conservative; callers needing larger documents
//! configure custom `Limits` at database-open time via `DatabaseConfig`.

use crate::value::{Document, Value};
use thiserror::Error;

/// Size limits enforced by the collection layer on keys and documents.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum collection-name length in bytes (default: 1024).
    pub max_key_bytes: usize,
    /// Maximum string field length in bytes (default: 16MB).
    pub max_string_bytes: usize,
    /// Maximum bytes field length (default: 16MB).
    pub max_bytes_len: usize,
    /// Maximum array length (default: 1M elements).
    pub max_array_len: usize,
    /// Maximum fields in any one document level (default: 1M entries).
    pub max_document_fields: usize,
    /// Maximum nesting depth across arrays and documents (default: 128).
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: 1024,
            max_string_bytes: 16 * 1024 * 1024,
            max_bytes_len: 16 * 1024 * 1024,
            max_array_len: 1_000_000,
            max_document_fields: 1_000_000,
            max_nesting_depth: 128,
        }
    }
}

impl Limits {
    /// Limits with small values, for unit tests that need to trip them
    /// without building extremely large values.
    pub fn with_small_limits() -> Self {
        Limits {
            max_key_bytes: 100,
            max_string_bytes: 1000,
            max_bytes_len: 1000,
            max_array_len: 100,
            max_document_fields: 100,
            max_nesting_depth: 10,
        }
    }

    /// Validate a collection-name length. For full validation (NUL bytes,
    /// reserved prefix), use `key::validate_collection_name`.
    pub fn validate_key_length(&self, key: &str) -> Result<(), LimitError> {
        let len = key.len();
        if len > self.max_key_bytes {
            return Err(LimitError::KeyTooLong {
                actual: len,
                max: self.max_key_bytes,
            });
        }
        Ok(())
    }

    /// Validate an entire document against size and nesting limits.
    pub fn validate_document(&self, doc: &Document) -> Result<(), LimitError> {
        if doc.len() > self.max_document_fields {
            return Err(LimitError::ValueTooLarge {
                reason: "document_too_many_fields".to_string(),
                actual: doc.len(),
                max: self.max_document_fields,
            });
        }
        for (_, v) in doc.iter() {
            self.validate_value(v, 1)?;
        }
        Ok(())
    }

    /// Validate a single value against size limits, recursing into arrays
    /// and nested documents.
    pub fn validate_value(&self, value: &Value, depth: usize) -> Result<(), LimitError> {
        if depth > self.max_nesting_depth {
            return Err(LimitError::NestingTooDeep {
                actual: depth,
                max: self.max_nesting_depth,
            });
        }

        match value {
            Value::Null
            | Value::Bool(_)
            | Value::I64(_)
            | Value::F64(_)
            | Value::Timestamp(_)
            | Value::ObjectId(_)
            | Value::Geometry(_) => Ok(()),

            Value::String(s) => {
                if s.len() > self.max_string_bytes {
                    return Err(LimitError::ValueTooLarge {
                        reason: "string_too_long".to_string(),
                        actual: s.len(),
                        max: self.max_string_bytes,
                    });
                }
                Ok(())
            }

            Value::Bytes(b) => {
                if b.len() > self.max_bytes_len {
                    return Err(LimitError::ValueTooLarge {
                        reason: "bytes_too_long".to_string(),
                        actual: b.len(),
                        max: self.max_bytes_len,
                    });
                }
                Ok(())
            }

            Value::Array(arr) => {
                if arr.len() > self.max_array_len {
                    return Err(LimitError::ValueTooLarge {
                        reason: "array_too_long".to_string(),
                        actual: arr.len(),
                        max: self.max_array_len,
                    });
                }
                for v in arr {
                    self.validate_value(v, depth + 1)?;
                }
                Ok(())
            }

            Value::Document(nested) => {
                if nested.len() > self.max_document_fields {
                    return Err(LimitError::ValueTooLarge {
                        reason: "document_too_many_fields".to_string(),
                        actual: nested.len(),
                        max: self.max_document_fields,
                    });
                }
                for (_, v) in nested.iter() {
                    self.validate_value(v, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

/// Limit validation errors.
#[derive(Debug, Error)]
pub enum LimitError {
    /// Collection-name length exceeds maximum.
    #[error("key too long: {actual} bytes exceeds maximum {max}")]
    KeyTooLong {
        /// Actual length in bytes.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },
    /// A value exceeds a size limit.
    #[error("value too large ({reason}): {actual} exceeds maximum {max}")]
    ValueTooLarge {
        /// Which limit was tripped.
        reason: String,
        /// Actual size.
        actual: usize,
        /// Maximum allowed size.
        max: usize,
    },
    /// Nesting depth exceeds maximum.
    #[error("nesting too deep: {actual} levels exceeds maximum {max}")]
    NestingTooDeep {
        /// Actual nesting depth.
        actual: usize,
        /// Maximum allowed depth.
        max: usize,
    },
}

impl LimitError {
    /// Stable reason code, useful for structured logging.
    pub fn reason_code(&self) -> &'static str {
        match self {
            LimitError::KeyTooLong { .. } => "key_too_long",
            LimitError::ValueTooLarge { .. } => "value_too_large",
            LimitError::NestingTooDeep { .. } => "nesting_too_deep",
        }
    }
}
