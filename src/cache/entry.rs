//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with their invalidation policy.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::{ChangeListener, Dependency, Invalidation, Subscription};

/// Type-erased stored value.
pub type Value = Arc<dyn Any + Send + Sync>;

// == Entry Info ==
/// Serializable metadata of an entry, without its value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub namespace: Option<String>,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    /// One of `never`, `absolute`, `sliding` or `dependencies`
    pub policy: &'static str,
    pub expires: Option<DateTime<Utc>>,
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
pub struct CacheEntry {
    key: String,
    namespace: Option<String>,
    value: Value,
    created: DateTime<Utc>,
    /// Last read, as Unix microseconds
    accessed: AtomicI64,
    invalidation: Invalidation,
    subscriptions: Mutex<Vec<(Arc<dyn Dependency>, Subscription)>>,
    detached: AtomicBool,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry; `created` and `accessed` are set to now.
    pub fn new(
        key: impl Into<String>,
        namespace: Option<String>,
        value: Value,
        invalidation: Invalidation,
    ) -> Self {
        Self::new_at(key, namespace, value, invalidation, Utc::now())
    }

    pub(crate) fn new_at(
        key: impl Into<String>,
        namespace: Option<String>,
        value: Value,
        invalidation: Invalidation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            namespace,
            value,
            created: now,
            accessed: AtomicI64::new(now.timestamp_micros()),
            invalidation,
            subscriptions: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        }
    }

    // == Accessors ==
    /// Caller-supplied logical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Namespace the entry was stored under.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Creation time.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Time of the last successful read (or creation).
    pub fn accessed(&self) -> DateTime<Utc> {
        Utc.timestamp_micros(self.accessed.load(Ordering::Acquire))
            .single()
            .unwrap_or(self.created)
    }

    /// The entry's fixed invalidation policy.
    pub fn invalidation(&self) -> &Invalidation {
        &self.invalidation
    }

    /// True iff the policy uses absolute or sliding expiration or has dependencies.
    pub fn can_expire(&self) -> bool {
        self.invalidation.can_expire()
    }

    // == Expiry ==
    /// Checks whether the entry has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Checks whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.invalidation.has_expired(now, self.accessed())
    }

    // == Refresh ==
    /// Marks the entry as read now, restarting a sliding window.
    pub fn refresh(&self) {
        self.refresh_at(Utc::now());
    }

    pub(crate) fn refresh_at(&self, now: DateTime<Utc>) {
        self.accessed
            .fetch_max(now.timestamp_micros(), Ordering::AcqRel);
    }

    // == Value Access ==
    /// Clones the stored value out if it is a `T`.
    pub fn value<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }

    /// Shares the stored value if it is a `T`.
    pub fn value_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Whether the stored value is a `T`.
    pub fn holds<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Type-erased stored value.
    pub fn raw_value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn type_mismatch<T>(&self) -> crate::error::CacheError {
        crate::error::CacheError::TypeMismatch {
            key: self.key.clone(),
            namespace: self.namespace.clone(),
            expected: type_name::<T>(),
        }
    }

    // == Dependency Wiring ==
    /// Starts every dependency and subscribes `listener` to each of them.
    ///
    /// Does nothing if the entry was already detached. The subscription lock
    /// is not held while dependencies run, so a dependency may call the
    /// listener from inside `subscribe`.
    pub(crate) fn attach(&self, listener: &ChangeListener) {
        let dependencies = self.invalidation.dependency_list();
        if dependencies.is_empty() || self.is_detached() {
            return;
        }

        let mut attached = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            dependency.start();
            let subscription = dependency.subscribe(Arc::clone(listener));
            attached.push((Arc::clone(dependency), subscription));
        }

        let mut subscriptions = self.subscriptions.lock();
        if !self.detached.load(Ordering::Acquire) {
            subscriptions.extend(attached);
            return;
        }
        drop(subscriptions);

        // Detached while subscribing
        for (dependency, subscription) in attached {
            dependency.unsubscribe(subscription);
        }
    }

    /// Unsubscribes from all dependencies. Only the first call has an effect.
    ///
    /// Returns `true` for the call that performed the detach.
    pub(crate) fn detach(&self) -> bool {
        if self.detached.swap(true, Ordering::AcqRel) {
            return false;
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (dependency, subscription) in subscriptions {
            dependency.unsubscribe(subscription);
        }
        true
    }

    /// Metadata snapshot. `expires` is the instant the entry lapses if it is
    /// not read again, for time-based policies.
    pub fn info(&self) -> EntryInfo {
        let accessed = self.accessed();
        let (policy, expires) = match &self.invalidation {
            Invalidation::Never => ("never", None),
            Invalidation::Absolute(at) => ("absolute", Some(*at)),
            Invalidation::Sliding(window) => (
                "sliding",
                chrono::Duration::from_std(*window)
                    .ok()
                    .and_then(|w| accessed.checked_add_signed(w)),
            ),
            Invalidation::Dependencies(_) => ("dependencies", None),
        };
        EntryInfo {
            key: self.key.clone(),
            namespace: self.namespace.clone(),
            created: self.created,
            accessed,
            policy,
            expires,
        }
    }

    /// Whether the entry has been detached from its dependencies.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("created", &self.created)
            .field("accessed", &self.accessed())
            .field("invalidation", &self.invalidation)
            .finish_non_exhaustive()
    }
}
