//! Pointer-keyed associative store shared by every registry in the bridge.
//!
//! Native callbacks may arrive on whichever thread drives the VM, so every
//! operation (not only insertion) takes the same lock. Critical sections only
//! touch the map: no native calls and no host delegates run while it is held.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Concurrent `address -> value` map.
///
/// Keys are raw addresses handed out by the native side (VMs, handles,
/// foreign data) or minted by the bridge (binding keys). Values are cloned
/// out on lookup so callers never hold the lock while using them.
#[derive(Debug)]
pub struct PointerRegistry<T> {
    entries: RwLock<FxHashMap<usize, T>>,
}

impl<T> Default for PointerRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<T> PointerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` unless `addr` is already present. Never overwrites.
    pub fn try_add(&self, addr: usize, value: T) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&addr) {
            return false;
        }
        entries.insert(addr, value);
        true
    }

    /// Overwrites (or inserts) the value stored under `addr`.
    pub fn set(&self, addr: usize, value: T) -> Option<T> {
        self.entries.write().insert(addr, value)
    }

    pub fn remove(&self, addr: usize) -> Option<T> {
        self.entries.write().remove(&addr)
    }

    /// Removes the entry only if `predicate` accepts it, under one write lock.
    pub fn remove_if(&self, addr: usize, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.write();
        match entries.get(&addr) {
            Some(value) if predicate(value) => entries.remove(&addr),
            _ => None,
        }
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.entries.read().contains_key(&addr)
    }

    /// Runs `f` against the stored value under the read lock.
    pub fn with<R>(&self, addr: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().get(&addr).map(f)
    }

    /// Runs `f` against the stored value under the write lock.
    pub fn with_mut<R>(&self, addr: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.entries.write().get_mut(&addr).map(f)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn count_where(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.entries.read().values().filter(|value| predicate(value)).count()
    }
}

impl<T: Clone> PointerRegistry<T> {
    pub fn try_get(&self, addr: usize) -> Option<T> {
        self.entries.read().get(&addr).cloned()
    }
}
