//! Memoization Module
//!
//! Caches the results of pure function calls, keyed by the function's identity
//! and its argument values.
//!
//! Arguments are passed as one tuple, so a function of any arity is memoized
//! the same way:
//!
//! ```
//! use memocache::{Cache, CacheConfig};
//!
//! let cache = Cache::new(CacheConfig::default().with_cleanup(false)).unwrap();
//! let area = cache.memoize(|(w, h): (u32, u32)| w * h);
//!
//! assert_eq!(area.call((3, 4)).unwrap(), 12);
//! assert_eq!(area.call((3, 4)).unwrap(), 12);
//! ```

mod signature;

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::cache::{Cache, Dependency, EntryKey, Invalidation};
use crate::error::Result;

pub use signature::{argument_hash, function_identity, memo_key};

/// Namespace holding every memoized result.
pub const MEMOIZATION_NAMESPACE: &str = "Memoization";

/// Resolves the dependencies of one memoized call from its arguments.
pub type DependencyResolver<A> = Arc<dyn Fn(&A) -> Vec<Arc<dyn Dependency>> + Send + Sync>;

// == Memo Policy ==
/// How long a memoized result stays valid.
pub enum MemoPolicy<A> {
    /// Results are kept until removed
    None,
    /// Every result expires at the same instant
    Absolute(DateTime<Utc>),
    /// Results expire when not requested for the window
    Sliding(Duration),
    /// Results expire when a dependency resolved from the arguments changes
    Dependencies(DependencyResolver<A>),
}

impl<A> MemoPolicy<A> {
    /// Results expire at `at`.
    pub fn absolute<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        Self::Absolute(at.with_timezone(&Utc))
    }

    /// Results expire after `window` without a call. Same bounds as
    /// [`Invalidation::sliding`].
    pub fn sliding(window: Duration) -> Result<Self> {
        Invalidation::sliding(window)?;
        Ok(Self::Sliding(window))
    }

    /// Results expire when any dependency returned by `resolver` changes.
    pub fn dependencies<R>(resolver: R) -> Self
    where
        R: Fn(&A) -> Vec<Arc<dyn Dependency>> + Send + Sync + 'static,
    {
        Self::Dependencies(Arc::new(resolver))
    }

    fn invalidation(&self, args: &A) -> Invalidation {
        match self {
            Self::None => Invalidation::Never,
            Self::Absolute(at) => Invalidation::Absolute(*at),
            Self::Sliding(window) => Invalidation::Sliding(*window),
            Self::Dependencies(resolver) => Invalidation::dependencies(resolver(args)),
        }
    }
}

impl<A> Clone for MemoPolicy<A> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Absolute(at) => Self::Absolute(*at),
            Self::Sliding(window) => Self::Sliding(*window),
            Self::Dependencies(resolver) => Self::Dependencies(Arc::clone(resolver)),
        }
    }
}

impl<A> fmt::Debug for MemoPolicy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Absolute(at) => f.debug_tuple("Absolute").field(at).finish(),
            Self::Sliding(window) => f.debug_tuple("Sliding").field(window).finish(),
            Self::Dependencies(_) => f.write_str("Dependencies(..)"),
        }
    }
}

// == Memoized ==
/// A function whose results are cached per argument tuple.
pub struct Memoized<A, R, F> {
    cache: Cache,
    func: F,
    identity: u64,
    policy: MemoPolicy<A>,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R, F> Memoized<A, R, F>
where
    A: Hash,
    R: Clone + Send + Sync + 'static,
    F: Fn(A) -> R,
{
    /// Wraps `func`, storing its results in `cache` under `policy`.
    ///
    /// The wrapper gets an identity of its own, so closures that differ only
    /// in what they captured never share results.
    pub fn new(cache: Cache, func: F, policy: MemoPolicy<A>) -> Self {
        Self {
            cache,
            func,
            identity: signature::instance_identity::<F, A, R>(),
            policy,
            _signature: PhantomData,
        }
    }

    /// Replaces the per-wrapper identity with one derived from `name`.
    ///
    /// Without a name every wrapper caches its own results, even when two
    /// wrappers hold the same function. Wrappers with the same name and
    /// argument values share results, so a name must stand for one function.
    pub fn with_identity(mut self, name: &str) -> Self {
        self.identity = signature::named_identity(name);
        self
    }

    /// Identity hash of the wrapped function.
    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Cache key used for `args`.
    pub fn key_for(&self, args: &A) -> String {
        memo_key(self.identity, args)
    }

    /// Returns the cached result for `args`, calling the function on a miss.
    ///
    /// Concurrent calls with equal arguments run the function once.
    pub fn call(&self, args: A) -> Result<R> {
        let key = self.key_for(&args);
        self.cache.store().get_or_produce(
            EntryKey::namespaced(&key, MEMOIZATION_NAMESPACE),
            || {
                let invalidation = self.policy.invalidation(&args);
                Ok::<_, std::convert::Infallible>(((self.func)(args), invalidation))
            },
        )
    }

    /// Drops the cached result for `args`. Returns whether one existed.
    pub fn forget(&self, args: &A) -> Result<bool> {
        let key = self.key_for(args);
        Ok(self
            .cache
            .remove(EntryKey::namespaced(&key, MEMOIZATION_NAMESPACE))?
            .is_some())
    }

    /// Converts the wrapper into a plain closure.
    pub fn into_fn(self) -> impl Fn(A) -> Result<R> {
        move |args| self.call(args)
    }
}

impl<A, R, F> fmt::Debug for Memoized<A, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("identity", &format_args!("{:016x}", self.identity))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Memoizes `func`; results never expire.
    pub fn memoize<A, R, F>(&self, func: F) -> Memoized<A, R, F>
    where
        A: Hash,
        R: Clone + Send + Sync + 'static,
        F: Fn(A) -> R,
    {
        self.memoize_with(func, MemoPolicy::None)
    }

    /// Memoizes `func` with results expiring under `policy`.
    pub fn memoize_with<A, R, F>(&self, func: F, policy: MemoPolicy<A>) -> Memoized<A, R, F>
    where
        A: Hash,
        R: Clone + Send + Sync + 'static,
        F: Fn(A) -> R,
    {
        Memoized::new(self.clone(), func, policy)
    }
}
