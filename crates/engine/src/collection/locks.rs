//! Striped per-document lock (spec.md §4.5): `lock(id)` hashes a document
//! id into one of a fixed, power-of-two number of stripes, so concurrent
//! operations on unrelated documents never block each other while two
//! operations on the same id always serialize through the same stripe.

use corvid_core::value::ObjectId;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A fixed bank of stripe locks, hashed into by document id.
pub struct StripedLocks {
    stripes: Vec<RwLock<()>>,
    mask: usize,
}

impl StripedLocks {
    /// Build a lock bank with at least `stripe_count` stripes, rounded up
    /// to the next power of two.
    pub fn new(stripe_count: usize) -> Self {
        let stripe_count = stripe_count.max(1).next_power_of_two();
        StripedLocks {
            stripes: (0..stripe_count).map(|_| RwLock::new(())).collect(),
            mask: stripe_count - 1,
        }
    }

    fn stripe_for(&self, id: ObjectId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    /// Acquire the write lock guarding one document's stripe.
    pub fn lock(&self, id: ObjectId) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe_for(id)].write()
    }

    /// Acquire the stripes for several documents at once, sorted by stripe
    /// index so that two callers locking overlapping id sets can never
    /// deadlock against each other (spec.md §4.5).
    pub fn lock_multiple(&self, ids: &[ObjectId]) -> Vec<RwLockWriteGuard<'_, ()>> {
        let mut stripes: Vec<usize> = ids.iter().map(|id| self.stripe_for(*id)).collect();
        stripes.sort_unstable();
        stripes.dedup();
        stripes.into_iter().map(|s| self.stripes[s].write()).collect()
    }
}
