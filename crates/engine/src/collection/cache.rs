//! Query result cache (spec.md §4.5): a bounded LRU keyed by
//! filter+sort+skip+limit+projection, with a fixed TTL, invalidated
//! wholesale on every write.

use crate::query::QueryOptions;
use corvid_core::value::Document;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Opaque cache key derived from a filter document and its query options.
pub type CacheKey = String;

/// Derive a cache key from a filter and the options accompanying it.
/// `Debug` renderings are stable for a given filter/options value and cheap
/// enough for this purpose — this isn't a wire format.
pub fn key_for(filter: &Document, options: &QueryOptions) -> CacheKey {
    format!("{filter:?}|{options:?}")
}

struct Entry {
    value: Vec<Document>,
    inserted_at: Instant,
}

/// Bounded LRU cache of query results, invalidated wholesale by
/// `Collection` on every successful mutation (spec.md §4.5, §7).
pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    order: Mutex<Vec<CacheKey>>,
}

impl QueryCache {
    /// A cache with the default 30-second TTL.
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, Duration::from_secs(30))
    }

    /// A cache with an explicit TTL.
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        QueryCache {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Fetch a cached result, evicting it first if its TTL has elapsed.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<Document>> {
        let mut entries = self.entries.lock().unwrap();
        let expired = entries.get(key)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            entries.remove(key);
            self.order.lock().unwrap().retain(|k| k != key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    /// Cache a result, evicting the oldest entry if over capacity.
    pub fn put(&self, key: CacheKey, value: Vec<Document>) {
        let mut entries = self.entries.lock().unwrap();
        let mut order = self.order.lock().unwrap();
        if !entries.contains_key(&key) {
            order.push(key.clone());
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        while order.len() > self.capacity {
            let evicted = order.remove(0);
            entries.remove(&evicted);
        }
    }

    /// Drop every cached entry (spec.md §4.5: any write invalidates the
    /// whole cache, not just the affected keys).
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
        self.order.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::value::Value;

    #[test]
    fn put_then_get_round_trips() {
        let cache = QueryCache::new(4);
        let mut doc = Document::new();
        doc.set("a", Value::I64(1));
        cache.put("k".to_string(), vec![doc.clone()]);
        assert_eq!(cache.get(&"k".to_string()), Some(vec![doc]));
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let cache = QueryCache::new(4);
        cache.put("k".to_string(), vec![Document::new()]);
        cache.invalidate_all();
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn over_capacity_evicts_oldest() {
        let cache = QueryCache::new(1);
        cache.put("a".to_string(), vec![Document::new()]);
        cache.put("b".to_string(), vec![Document::new()]);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.get(&"b".to_string()).is_some());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = QueryCache::with_ttl(4, Duration::from_millis(0));
        cache.put("k".to_string(), vec![Document::new()]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"k".to_string()), None);
    }
}
