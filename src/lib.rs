//! Memocache - An in-process memoizing cache
//!
//! Stores arbitrary values under string keys with absolute, sliding and
//! dependency-based invalidation, runs value producers at most once per key,
//! sweeps expired entries in the background and memoizes function calls.

pub mod cache;
pub mod config;
pub mod error;
pub mod memo;
pub mod tasks;

pub use cache::{
    Cache, CacheEntry, CacheStats, Dependency, EntryInfo, EntryKey, Invalidation,
    SignalDependency,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use memo::{MemoPolicy, Memoized, MEMOIZATION_NAMESPACE};
pub use tasks::SweepState;
