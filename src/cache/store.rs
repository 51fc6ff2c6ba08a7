//! Cache Store Module
//!
//! Concurrent entry table with the single-flight fetch-or-create protocol.
//!
//! Every storage key maps to a [`Slot`]: a once-cell that is either still being
//! produced or holds a published [`CacheEntry`]. Callers racing on the same
//! missing key all adopt the first slot inserted into the map; the cell runs
//! exactly one producer at a time and the others block until it is published.
//! No map shard lock is held while a producer runs, so different keys never
//! wait on each other.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheEntry, CacheStats, ChangeListener, EntryKey, Invalidation, KeyProvider};
use crate::error::{BoxError, CacheError, Result};

// == Slot ==
/// Per-key single-flight cell.
#[derive(Debug, Default)]
struct Slot {
    cell: OnceCell<Arc<CacheEntry>>,
}

impl Slot {
    fn ready(entry: CacheEntry) -> Self {
        Self {
            cell: OnceCell::with_value(Arc::new(entry)),
        }
    }

    fn entry(&self) -> Option<&Arc<CacheEntry>> {
        self.cell.get()
    }
}

/// Removes a slot that is still empty when its producer returns or unwinds,
/// so a failed production never leaves anything behind for the key.
struct AbandonGuard<'a> {
    store: &'a CacheStore,
    storage_key: u64,
    slot: &'a Arc<Slot>,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.slot.entry().is_none() {
            self.store
                .entries
                .remove_if(&self.storage_key, |_, current| {
                    Arc::ptr_eq(current, self.slot) && current.entry().is_none()
                });
        }
    }
}

// == Cache Store ==
/// Thread-safe mapping from derived storage keys to cache entries.
pub struct CacheStore {
    /// Storage key -> slot
    entries: DashMap<u64, Arc<Slot>>,
    /// Storage key derivation
    key_provider: KeyProvider,
    /// Performance statistics
    stats: StatsRecorder,
    /// Handed to dependency listeners
    this: Weak<CacheStore>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store using `key_provider` to derive storage keys.
    pub fn new(key_provider: KeyProvider) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            entries: DashMap::new(),
            key_provider,
            stats: StatsRecorder::default(),
            this: this.clone(),
        })
    }

    /// Derives the storage key of a logical key.
    pub fn storage_key(&self, key: &EntryKey<'_>) -> u64 {
        (self.key_provider)(key.key, key.namespace)
    }

    // == Get Or Add ==
    /// Returns the live value for `key`, producing it at most once when absent.
    ///
    /// On a hit the entry's access time is refreshed. On a miss (or an expired
    /// entry) a single caller runs `value_fn` and `policy_fn`; concurrent
    /// callers for the same key wait for that result instead of producing their
    /// own. A failed producer is reported to its caller only and leaves nothing
    /// cached. A producer must not request its own key.
    pub fn get_or_try_add<T, E, F, P>(
        &self,
        key: EntryKey<'_>,
        value_fn: F,
        policy_fn: P,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E>,
        P: FnOnce() -> Invalidation,
    {
        self.get_or_produce(key, || Ok::<_, E>((value_fn()?, policy_fn())))
    }

    /// [`CacheStore::get_or_try_add`] with a producer that returns the value
    /// together with its policy.
    pub(crate) fn get_or_produce<T, E, F>(&self, key: EntryKey<'_>, produce: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<(T, Invalidation), E>,
    {
        key.validate()?;
        let storage_key = self.storage_key(&key);

        let slot = loop {
            let slot = self.slot_for(storage_key);
            match slot.entry() {
                Some(entry) if entry.is_expired() => {
                    self.evict(storage_key, &slot);
                }
                _ => break slot,
            }
        };

        let guard = AbandonGuard {
            store: self,
            storage_key,
            slot: &slot,
        };
        let mut created = false;
        let produced = slot.cell.get_or_try_init(|| {
            created = true;
            let (value, invalidation) = produce()?;
            let entry = CacheEntry::new(
                key.key,
                key.namespace.map(str::to_owned),
                Arc::new(value),
                invalidation,
            );
            Ok::<_, E>(Arc::new(entry))
        });
        drop(guard);

        let entry = match produced {
            Ok(entry) => Arc::clone(entry),
            Err(err) => {
                let source = err.into();
                debug!(key = key.key, namespace = ?key.namespace, error = %source, "Value producer failed");
                return Err(CacheError::Producer {
                    key: key.key.to_owned(),
                    namespace: key.namespace.map(str::to_owned),
                    source,
                });
            }
        };

        if created {
            self.stats.record_miss();
            if self.publish(storage_key, &slot) {
                self.attach(storage_key, &slot);
            }
            if entry.is_expired() {
                self.evict(storage_key, &slot);
            }
        } else {
            self.stats.record_hit();
            entry.refresh();
        }

        entry.value::<T>().ok_or_else(|| entry.type_mismatch::<T>())
    }

    // == Add ==
    /// Inserts only when no live entry exists. Returns whether it was inserted.
    pub fn add<T>(&self, key: EntryKey<'_>, value: T, invalidation: Invalidation) -> Result<bool>
    where
        T: Send + Sync + 'static,
    {
        key.validate()?;
        let storage_key = self.storage_key(&key);
        let slot = Arc::new(Slot::ready(Self::build(&key, value, invalidation)));

        let replaced = match self.entries.entry(storage_key) {
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&slot));
                None
            }
            Entry::Occupied(mut occupied) => {
                let expired = occupied
                    .get()
                    .entry()
                    .is_some_and(|entry| entry.is_expired());
                if !expired {
                    return Ok(false);
                }
                Some(occupied.insert(Arc::clone(&slot)))
            }
        };

        if let Some(entry) = replaced.as_ref().and_then(|old| old.entry()) {
            entry.detach();
            self.stats.record_eviction();
        }
        self.attach(storage_key, &slot);
        Ok(true)
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing entry and its policy.
    pub fn set<T>(&self, key: EntryKey<'_>, value: T, invalidation: Invalidation) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        key.validate()?;
        let storage_key = self.storage_key(&key);
        let slot = Arc::new(Slot::ready(Self::build(&key, value, invalidation)));

        if let Some(previous) = self.entries.insert(storage_key, Arc::clone(&slot)) {
            if let Some(entry) = previous.entry() {
                entry.detach();
            }
        }
        self.attach(storage_key, &slot);
        Ok(())
    }

    // == Get ==
    /// Returns the live entry for `key`, refreshing its access time.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: EntryKey<'_>) -> Result<Option<Arc<CacheEntry>>> {
        key.validate()?;
        let storage_key = self.storage_key(&key);

        let Some(slot) = self.current_slot(storage_key) else {
            self.stats.record_miss();
            return Ok(None);
        };
        let Some(entry) = slot.entry() else {
            self.stats.record_miss();
            return Ok(None);
        };
        if entry.is_expired() {
            self.evict(storage_key, &slot);
            self.stats.record_miss();
            return Ok(None);
        }

        entry.refresh();
        self.stats.record_hit();
        Ok(Some(Arc::clone(entry)))
    }

    /// Typed [`CacheStore::get`].
    pub fn try_get<T>(&self, key: EntryKey<'_>) -> Result<Option<T>>
    where
        T: Clone + 'static,
    {
        match self.get(key)? {
            Some(entry) => entry
                .value::<T>()
                .map(Some)
                .ok_or_else(|| entry.type_mismatch::<T>()),
            None => Ok(None),
        }
    }

    // == Contains ==
    /// Whether a live entry exists. Does not refresh or remove anything.
    pub fn contains(&self, key: EntryKey<'_>) -> Result<bool> {
        key.validate()?;
        let storage_key = self.storage_key(&key);
        Ok(self
            .current_slot(storage_key)
            .and_then(|slot| slot.entry().map(|entry| !entry.is_expired()))
            .unwrap_or(false))
    }

    // == Remove ==
    /// Removes the entry for `key`, returning it if it was still live.
    pub fn remove(&self, key: EntryKey<'_>) -> Result<Option<Arc<CacheEntry>>> {
        key.validate()?;
        let storage_key = self.storage_key(&key);

        let Some((_, slot)) = self.entries.remove(&storage_key) else {
            return Ok(None);
        };
        let Some(entry) = slot.entry() else {
            return Ok(None);
        };
        entry.detach();
        if entry.is_expired() {
            return Ok(None);
        }
        Ok(Some(Arc::clone(entry)))
    }

    // == Enumeration ==
    /// Live entries in `namespace` (all namespaces for `None`).
    ///
    /// Works on a point-in-time copy of the table; entries removed after the
    /// copy was taken are skipped.
    pub fn entries(&self, namespace: Option<&str>) -> Vec<Arc<CacheEntry>> {
        let now = Utc::now();
        self.snapshot()
            .into_iter()
            .filter_map(|(storage_key, slot)| {
                let entry = slot.entry()?;
                let live = self.in_namespace(entry, namespace)
                    && !entry.is_expired_at(now)
                    && self.is_current(storage_key, &slot);
                live.then(|| Arc::clone(entry))
            })
            .collect()
    }

    /// Number of live entries in `namespace` (all namespaces for `None`).
    pub fn count(&self, namespace: Option<&str>) -> usize {
        self.entries(namespace).len()
    }

    /// Logical keys of the live entries in `namespace`.
    pub fn keys(&self, namespace: Option<&str>) -> Vec<String> {
        self.entries(namespace)
            .iter()
            .map(|entry| entry.key().to_owned())
            .collect()
    }

    /// Removes every entry in `namespace` (all entries for `None`).
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, namespace: Option<&str>) -> usize {
        let mut removed = 0;
        for (storage_key, slot) in self.snapshot() {
            let in_scope = slot
                .entry()
                .is_some_and(|entry| self.in_namespace(entry, namespace));
            if in_scope && self.remove_slot(storage_key, &slot) {
                removed += 1;
            }
        }
        removed
    }

    // == Sweep ==
    /// Removes every entry whose policy reports expiry.
    ///
    /// A failure while evaluating one entry is logged and that entry skipped.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        for (storage_key, slot) in self.snapshot() {
            let Some(entry) = slot.entry() else {
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| {
                entry.can_expire() && entry.is_expired_at(now)
            })) {
                Ok(true) => {
                    if self.evict(storage_key, &slot) {
                        removed += 1;
                    }
                }
                Ok(false) => {}
                Err(_) => {
                    warn!(key = entry.key(), namespace = ?entry.namespace(), "Failed to evaluate entry expiry during sweep; skipping");
                }
            }
        }

        removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    // == Length ==
    /// Number of slots in the table, including ones still being produced or
    /// expired but not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Internals ==
    fn build<T>(key: &EntryKey<'_>, value: T, invalidation: Invalidation) -> CacheEntry
    where
        T: Send + Sync + 'static,
    {
        CacheEntry::new(
            key.key,
            key.namespace.map(str::to_owned),
            Arc::new(value),
            invalidation,
        )
    }

    /// Existing slot for `storage_key`, or a freshly inserted empty one.
    fn slot_for(&self, storage_key: u64) -> Arc<Slot> {
        Arc::clone(
            self.entries
                .entry(storage_key)
                .or_insert_with(|| Arc::new(Slot::default()))
                .value(),
        )
    }

    /// Whether `entry` belongs to `filter` (any namespace for `None`).
    ///
    /// Decided by the key provider: the entry matches when its key under
    /// `filter` derives the same storage key as under its own namespace.
    fn in_namespace(&self, entry: &CacheEntry, filter: Option<&str>) -> bool {
        match (filter, entry.namespace()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(filter), Some(namespace)) => {
                filter == namespace
                    || (self.key_provider)(entry.key(), Some(filter))
                        == (self.key_provider)(entry.key(), Some(namespace))
            }
        }
    }

    fn current_slot(&self, storage_key: u64) -> Option<Arc<Slot>> {
        self.entries
            .get(&storage_key)
            .map(|slot| Arc::clone(slot.value()))
    }

    fn is_current(&self, storage_key: u64, slot: &Arc<Slot>) -> bool {
        self.entries
            .get(&storage_key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    fn snapshot(&self) -> Vec<(u64, Arc<Slot>)> {
        self.entries
            .iter()
            .map(|item| (*item.key(), Arc::clone(item.value())))
            .collect()
    }

    /// Makes sure a freshly produced slot is reachable.
    ///
    /// A slot can be dropped from the table while its producer runs (an earlier
    /// producer on the same cell failed). It is re-inserted only if nothing
    /// else took the key meanwhile. Returns whether `slot` is the current one.
    fn publish(&self, storage_key: u64, slot: &Arc<Slot>) -> bool {
        let current = self
            .entries
            .entry(storage_key)
            .or_insert_with(|| Arc::clone(slot));
        Arc::ptr_eq(current.value(), slot)
    }

    /// Subscribes the slot's entry to its dependencies.
    fn attach(&self, storage_key: u64, slot: &Arc<Slot>) {
        let Some(entry) = slot.entry() else {
            return;
        };
        if entry.invalidation().dependency_list().is_empty() {
            return;
        }

        let store = self.this.clone();
        let weak_slot = Arc::downgrade(slot);
        let listener: ChangeListener = Arc::new(move || {
            if let (Some(store), Some(slot)) = (store.upgrade(), weak_slot.upgrade()) {
                store.on_dependency_changed(storage_key, &slot);
            }
        });
        entry.attach(&listener);

        // A dependency may have changed before the subscription existed.
        if entry.is_expired() {
            self.evict(storage_key, slot);
        }
    }

    fn on_dependency_changed(&self, storage_key: u64, slot: &Arc<Slot>) {
        let Some(entry) = slot.entry() else {
            return;
        };
        entry.detach();
        if self.evict(storage_key, slot) {
            debug!(key = entry.key(), namespace = ?entry.namespace(), "Evicted entry after dependency change");
        }
    }

    /// Removes `slot` if it is still the current slot for `storage_key`.
    fn remove_slot(&self, storage_key: u64, slot: &Arc<Slot>) -> bool {
        let Some((_, removed)) = self
            .entries
            .remove_if(&storage_key, |_, current| Arc::ptr_eq(current, slot))
        else {
            return false;
        };
        if let Some(entry) = removed.entry() {
            entry.detach();
        }
        true
    }

    /// [`CacheStore::remove_slot`] for expired entries, counted as an eviction.
    fn evict(&self, storage_key: u64, slot: &Arc<Slot>) -> bool {
        let removed = self.remove_slot(storage_key, slot);
        if removed {
            self.stats.record_eviction();
        }
        removed
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
