//! Cache Handle Module
//!
//! The public cache instance: a shared store plus its background sweep.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, CacheStore, EntryKey, Invalidation};
use crate::config::CacheConfig;
use crate::error::{BoxError, Result};
use crate::tasks::{SweepState, Sweeper};

// Dropping the sweeper stops its task.
struct CacheInner {
    store: Arc<CacheStore>,
    sweeper: Sweeper,
}

// == Cache ==
/// A memoizing in-process cache.
///
/// Clones share the same entries. The background sweep stops when the last
/// clone is dropped or [`Cache::shutdown`] is called.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    // == Constructors ==
    /// Creates a cache from `config`.
    ///
    /// With `enable_cleanup` set this must run inside a tokio runtime; use
    /// [`Cache::with_runtime`] otherwise.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Creates a cache whose sweep runs on `runtime`.
    pub fn with_runtime(config: CacheConfig, runtime: Handle) -> Result<Self> {
        Self::build(config, Some(runtime))
    }

    fn build(config: CacheConfig, runtime: Option<Handle>) -> Result<Self> {
        config.validate()?;
        let store = CacheStore::new(Arc::clone(&config.key_provider));
        let sweeper = Sweeper::new(
            Arc::downgrade(&store),
            config.first_sweep,
            config.succeeding_sweep,
            runtime,
        );
        if config.enable_cleanup {
            sweeper.start()?;
        }
        debug!(?config, "Cache created");

        Ok(Self {
            inner: Arc::new(CacheInner { store, sweeper }),
        })
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    // == Fetch Or Create ==
    /// Returns the cached value for `key`, producing it with `value_fn` on a miss.
    ///
    /// The entry never expires.
    pub fn get_or_add<'k, T, F>(&self, key: impl Into<EntryKey<'k>>, value_fn: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.get_or_add_with(key, value_fn, Invalidation::default)
    }

    /// Returns the cached value for `key`, producing it with `value_fn` and
    /// `policy_fn` on a miss. Concurrent misses on the same key run the
    /// producer once.
    pub fn get_or_add_with<'k, T, F, P>(
        &self,
        key: impl Into<EntryKey<'k>>,
        value_fn: F,
        policy_fn: P,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
        P: FnOnce() -> Invalidation,
    {
        self.inner.store.get_or_try_add(
            key.into(),
            || Ok::<_, Infallible>(value_fn()),
            policy_fn,
        )
    }

    /// Fallible [`Cache::get_or_add_with`]. A producer error is returned as
    /// [`crate::CacheError::Producer`] and nothing is cached.
    pub fn try_get_or_add_with<'k, T, E, F, P>(
        &self,
        key: impl Into<EntryKey<'k>>,
        value_fn: F,
        policy_fn: P,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> std::result::Result<T, E>,
        P: FnOnce() -> Invalidation,
    {
        self.inner.store.get_or_try_add(key.into(), value_fn, policy_fn)
    }

    // == Writes ==
    /// Inserts `value` only if `key` has no live entry. Returns whether it was inserted.
    pub fn add<'k, T>(
        &self,
        key: impl Into<EntryKey<'k>>,
        value: T,
        invalidation: Invalidation,
    ) -> Result<bool>
    where
        T: Send + Sync + 'static,
    {
        self.inner.store.add(key.into(), value, invalidation)
    }

    /// Stores `value` under `key`, replacing any existing entry.
    pub fn set<'k, T>(
        &self,
        key: impl Into<EntryKey<'k>>,
        value: T,
        invalidation: Invalidation,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.inner.store.set(key.into(), value, invalidation)
    }

    /// Removes the entry for `key`, returning it if it was live.
    pub fn remove<'k>(&self, key: impl Into<EntryKey<'k>>) -> Result<Option<Arc<CacheEntry>>> {
        self.inner.store.remove(key.into())
    }

    /// Removes every entry in `namespace`, or all entries for `None`.
    pub fn clear(&self, namespace: Option<&str>) -> usize {
        self.inner.store.clear(namespace)
    }

    // == Reads ==
    /// Returns the live value for `key` as a `T`.
    pub fn try_get<'k, T>(&self, key: impl Into<EntryKey<'k>>) -> Result<Option<T>>
    where
        T: Clone + 'static,
    {
        self.inner.store.try_get(key.into())
    }

    /// Returns the live entry for `key`.
    pub fn get<'k>(&self, key: impl Into<EntryKey<'k>>) -> Result<Option<Arc<CacheEntry>>> {
        self.inner.store.get(key.into())
    }

    /// Whether `key` has a live entry.
    pub fn contains<'k>(&self, key: impl Into<EntryKey<'k>>) -> Result<bool> {
        self.inner.store.contains(key.into())
    }

    /// Number of live entries in `namespace`, or in total for `None`.
    pub fn count(&self, namespace: Option<&str>) -> usize {
        self.inner.store.count(namespace)
    }

    /// Snapshot of the live entries in `namespace`, or all for `None`.
    pub fn entries(&self, namespace: Option<&str>) -> Vec<Arc<CacheEntry>> {
        self.inner.store.entries(namespace)
    }

    /// Keys of the live entries in `namespace`, or all for `None`.
    pub fn keys(&self, namespace: Option<&str>) -> Vec<String> {
        self.inner.store.keys(namespace)
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    // == Sweep Control ==
    /// Runs one sweep on the calling thread. Returns the number of entries removed.
    pub fn sweep_now(&self) -> usize {
        self.inner.store.sweep()
    }

    /// Turns the background sweep on or off.
    pub fn set_cleanup_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.inner.sweeper.start()
        } else {
            self.inner.sweeper.stop();
            Ok(())
        }
    }

    /// Current state of the background sweep.
    pub fn sweep_state(&self) -> SweepState {
        self.inner.sweeper.state()
    }

    /// Stops the background sweep. Entries stay readable.
    pub fn shutdown(&self) {
        self.inner.sweeper.stop();
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.inner.store)
            .field("sweeper", &self.inner.sweeper)
            .finish()
    }
}
