//! Cache Module
//!
//! In-process entry store with absolute, sliding and dependency-based
//! invalidation, namespaces and single-flight get-or-create.

mod dependency;
mod entry;
mod handle;
pub(crate) mod key;
mod policy;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use dependency::{ChangeListener, Dependency, SignalDependency, Subscription};
pub use entry::{CacheEntry, EntryInfo, Value};
pub use handle::Cache;
pub use key::{default_key_provider, default_provider, EntryKey, KeyProvider};
pub use policy::{Invalidation, MAX_SLIDING_WINDOW};
pub use stats::CacheStats;
pub use store::CacheStore;
