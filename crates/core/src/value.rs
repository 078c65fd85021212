//! Document value model
//!
//! This module defines:
//! - `Value`: the tagged union every document field holds
//! - `Document`: an ordered association of field name to `Value`
//! - `ObjectId`: a 12-byte generated document identity
//! - `Timestamp`: microsecond-precision point in time

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Microsecond-precision timestamp.
///
/// Represents a point in time as microseconds since the Unix epoch. Used for
/// `Value::Timestamp` fields and TTL-index comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Current moment. Returns the epoch if the system clock is before 1970.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Timestamp(micros)
    }

    /// Build from microseconds since epoch.
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Build from milliseconds since epoch.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000))
    }

    /// Build from seconds since epoch.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Microseconds since epoch.
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Milliseconds since epoch (truncating).
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Seconds since epoch (truncating).
    #[inline]
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whether `self + duration_micros <= other`.
    pub fn expired_at(&self, duration_micros: u64, other: Timestamp) -> bool {
        self.0.saturating_add(duration_micros) <= other.0
    }
}

/// 12-byte generated document identity, in the classic timestamp + random +
/// counter layout: 4-byte seconds-since-epoch, 5-byte process-random value,
/// 3-byte incrementing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

fn process_random5() -> [u8; 5] {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    let h = hasher.finish().to_be_bytes();
    [h[0], h[1], h[2], h[3], h[4]]
}

impl ObjectId {
    /// Generate a new id from the current time, a process-derived random
    /// component, and a monotonically incrementing counter.
    pub fn new() -> Self {
        let secs = Timestamp::now().as_secs() as u32;
        let random = process_random5();
        let counter = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        let c = counter.to_be_bytes();
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..12].copy_from_slice(&c[1..4]);
        ObjectId(bytes)
    }

    /// Build from raw bytes (e.g. read back from storage).
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    /// The raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Lower-hex string rendering, used for display and as a map key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 24-character hex string back into an `ObjectId`.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for i in 0..12 {
            bytes[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ObjectId(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A point or coarse region used by the geo indexes. Coordinates are
/// `(longitude, latitude)` in degrees, matching GeoJSON's axis order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// A single point.
    Point {
        /// Longitude in degrees.
        lon: f64,
        /// Latitude in degrees.
        lat: f64,
    },
}

impl Geometry {
    /// The point this geometry is indexed at (geo indexes only support
    /// points in this implementation; polygons are out of scope).
    pub fn point(&self) -> (f64, f64) {
        match self {
            Geometry::Point { lon, lat } => (*lon, *lat),
        }
    }
}

/// Unified value type for every field a `Document` can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit floating point.
    F64(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Microsecond-precision timestamp.
    Timestamp(Timestamp),
    /// Generated document identity, usable as a field value (e.g. a foreign
    /// reference to another document).
    ObjectId(ObjectId),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
    /// Geo point/region.
    Geometry(Geometry),
}

impl Value {
    /// A type tag used for diagnostics and error messages (`$type`-style
    /// checks never need more than this).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::ObjectId(_) => "object_id",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
            Value::Geometry(_) => "geometry",
        }
    }

    /// Numeric value as `f64`, if this value is `I64` or `F64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    /// String slice, if this value is `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value should be treated as absent for `$exists`-style
    /// checks and index-null sentinels.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// An ordered association of field name to `Value`.
///
/// Field order is insertion order (not alphabetical), matching what callers
/// hand in and what gets serialized back out. Nested documents and arrays
/// share their backing allocation via `Arc` so that snapshotting a document
/// for MVCC or a savepoint is a cheap, copy-on-write clone: mutating a
/// `Document` always goes through `Arc::make_mut`, so a shared snapshot is
/// never observed to change underneath its holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Arc<Vec<(String, Value)>>,
}

impl Document {
    /// An empty document.
    pub fn new() -> Self {
        Document {
            fields: Arc::new(Vec::new()),
        }
    }

    /// Build from an ordered list of fields.
    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        Document {
            fields: Arc::new(fields),
        }
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no top-level fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get a top-level field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Set (insert or overwrite) a top-level field, preserving the original
    /// insertion position on overwrite.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let fields = Arc::make_mut(&mut self.fields);
        if let Some(entry) = fields.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            fields.push((name, value));
        }
    }

    /// Remove a top-level field, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let fields = Arc::make_mut(&mut self.fields);
        let pos = fields.iter().position(|(k, _)| k == name)?;
        Some(fields.remove(pos).1)
    }

    /// Resolve a dotted path (`"a.b.c"`) through nested documents.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for seg in segments {
            match current {
                Value::Document(doc) => current = doc.get(seg)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Set a value at a dotted path, creating intermediate nested documents
    /// as needed.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return;
        };
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            self.set(first, value);
            return;
        }
        let mut nested = match self.get(first) {
            Some(Value::Document(doc)) => doc.clone(),
            _ => Document::new(),
        };
        nested.set_path(&rest.join("."), value);
        self.set(first, Value::Document(nested));
    }

    /// Remove a value at a dotted path. No-op if any intermediate segment
    /// is missing or not a document.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.len() == 1 {
            return self.remove(segments[0]);
        }
        let first = segments.remove(0);
        let rest = segments.join(".");
        match self.get(first).cloned() {
            Some(Value::Document(mut doc)) => {
                let removed = doc.remove_path(&rest);
                self.set(first, Value::Document(doc));
                removed
            }
            _ => None,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}
