//! Shared Value Store: a refcounted interning table for shared-managed
//! component values. Heterogeneous value types are stored behind a
//! hand-rolled `SharedValue` trait object since a plain generic `HashMap`
//! cannot key on `dyn Eq + Hash`.

use std::any::Any;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ahash::AHasher;
use parking_lot::{Mutex, RwLock};

/// Index into the [`SharedValueStore`]. `-1` (via `Option::None` at the API
/// boundary) denotes "no value".
pub type SharedIndex = i32;

/// Type-erased equality/hash/downcast for values the shared store interns.
pub trait SharedValue: Any + Send + Sync {
    fn dyn_eq(&self, other: &dyn SharedValue) -> bool;
    fn dyn_hash(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

impl<T> SharedValue for T
where
    T: Any + Send + Sync + Eq + Hash,
{
    fn dyn_eq(&self, other: &dyn SharedValue) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(o) => self == o,
            None => false,
        }
    }

    fn dyn_hash(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Entry {
    value: Box<dyn SharedValue>,
    refcount: u32,
}

struct Inner {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    buckets: HashMap<u64, Vec<usize>>,
}

/// Refcounted interning table. `get_or_add` increments a value's refcount
/// (inserting it on first sight); `release` decrements and evicts at zero;
/// `find`/`value_at` never mutate.
#[derive(Default)]
pub struct SharedValueStore {
    inner: RwLock<Inner>,
    // Serializes the rare mutating paths; reads (`find`, `value_at`) only
    // take the RwLock read guard.
    write_lock: Mutex<()>,
}

impl Inner {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    fn find_index(&self, hash: u64, value: &dyn SharedValue) -> Option<usize> {
        self.buckets.get(&hash).and_then(|candidates| {
            candidates.iter().copied().find(|&idx| {
                matches!(&self.slots[idx], Some(entry) if entry.value.dyn_eq(value))
            })
        })
    }
}

impl SharedValueStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Intern `value`, incrementing its refcount (inserting if new).
    pub fn get_or_add<T>(&self, value: T) -> SharedIndex
    where
        T: Any + Send + Sync + Eq + Hash,
    {
        let _guard = self.write_lock.lock();
        let hash = {
            let mut hasher = AHasher::default();
            value.hash(&mut hasher);
            hasher.finish()
        };

        let mut inner = self.inner.write();
        if let Some(idx) = inner.find_index(hash, &value) {
            inner.slots[idx].as_mut().unwrap().refcount += 1;
            return idx as SharedIndex;
        }

        let entry = Entry {
            value: Box::new(value),
            refcount: 1,
        };
        let idx = if let Some(reused) = inner.free.pop() {
            inner.slots[reused] = Some(entry);
            reused
        } else {
            inner.slots.push(Some(entry));
            inner.slots.len() - 1
        };
        inner.buckets.entry(hash).or_default().push(idx);
        idx as SharedIndex
    }

    /// Look up `value` without mutating its refcount. Returns `-1` if absent.
    pub fn find<T>(&self, value: &T) -> SharedIndex
    where
        T: Any + Send + Sync + Eq + Hash,
    {
        let hash = {
            let mut hasher = AHasher::default();
            value.hash(&mut hasher);
            hasher.finish()
        };
        let inner = self.inner.read();
        inner.find_index(hash, value).map(|i| i as SharedIndex).unwrap_or(-1)
    }

    /// Decrement `index`'s refcount, evicting it when it reaches zero.
    pub fn release(&self, index: SharedIndex) {
        if index < 0 {
            return;
        }
        let _guard = self.write_lock.lock();
        let mut inner = self.inner.write();
        let idx = index as usize;
        let evict = match inner.slots.get_mut(idx) {
            Some(Some(entry)) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            }
            _ => false,
        };
        if evict {
            let hash = inner.slots[idx].as_ref().unwrap().value.dyn_hash();
            inner.slots[idx] = None;
            if let Some(bucket) = inner.buckets.get_mut(&hash) {
                bucket.retain(|&i| i != idx);
            }
            inner.free.push(idx);
        }
    }

    pub fn value_at<T: Any + Send + Sync>(&self, index: SharedIndex) -> Option<std::sync::Arc<T>>
    where
        T: Clone,
    {
        if index < 0 {
            return None;
        }
        let inner = self.inner.read();
        match inner.slots.get(index as usize) {
            Some(Some(entry)) => entry.value.as_any().downcast_ref::<T>().cloned().map(std::sync::Arc::new),
            _ => None,
        }
    }

    pub fn with<T: Any + Send + Sync, R>(&self, index: SharedIndex, f: impl FnOnce(&T) -> R) -> Option<R> {
        if index < 0 {
            return None;
        }
        let inner = self.inner.read();
        match inner.slots.get(index as usize) {
            Some(Some(entry)) => entry.value.as_any().downcast_ref::<T>().map(f),
            _ => None,
        }
    }

    pub fn refcount(&self, index: SharedIndex) -> u32 {
        if index < 0 {
            return 0;
        }
        let inner = self.inner.read();
        match inner.slots.get(index as usize) {
            Some(Some(entry)) => entry.refcount,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_value_increments_refcount_and_shares_index() {
        let store = SharedValueStore::new();
        let a = store.get_or_add(String::from("hello"));
        let b = store.get_or_add(String::from("hello"));
        assert_eq!(a, b);
        assert_eq!(store.refcount(a), 2);
    }

    #[test]
    fn distinct_values_get_distinct_indices() {
        let store = SharedValueStore::new();
        let a = store.get_or_add(1i64);
        let b = store.get_or_add(2i64);
        assert_ne!(a, b);
    }

    #[test]
    fn release_to_zero_evicts_and_frees_slot_for_reuse() {
        let store = SharedValueStore::new();
        let a = store.get_or_add(String::from("x"));
        store.release(a);
        assert_eq!(store.find(&String::from("x")), -1);
        let b = store.get_or_add(String::from("y"));
        assert_eq!(a, b); // slot reused
    }

    #[test]
    fn find_does_not_mutate_refcount() {
        let store = SharedValueStore::new();
        let a = store.get_or_add(7i64);
        assert_eq!(store.find(&7i64), a);
        assert_eq!(store.refcount(a), 1);
    }
}
