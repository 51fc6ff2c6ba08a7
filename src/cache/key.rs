//! Key Module
//!
//! Logical keys (key + optional namespace) and their derivation into 64-bit
//! storage keys.

use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;
use once_cell::sync::Lazy;

use crate::error::{CacheError, Result};

/// Derives the storage key for a logical key and optional namespace.
pub type KeyProvider = Arc<dyn Fn(&str, Option<&str>) -> u64 + Send + Sync>;

// Fixed seeds keep hashes stable for the lifetime of the process and across
// cache instances.
pub(crate) static HASH_STATE: Lazy<RandomState> = Lazy::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

// == Entry Key ==
/// A logical cache key, optionally scoped to a namespace.
///
/// Entries with the same key but different namespaces are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryKey<'a> {
    /// Caller-supplied identifier
    pub key: &'a str,
    /// Optional partition label
    pub namespace: Option<&'a str>,
}

impl<'a> EntryKey<'a> {
    /// Creates a key without namespace.
    pub fn new(key: &'a str) -> Self {
        Self {
            key,
            namespace: None,
        }
    }

    /// Creates a key scoped to `namespace`.
    pub fn namespaced(key: &'a str, namespace: &'a str) -> Self {
        Self {
            key,
            namespace: Some(namespace),
        }
    }

    /// Rejects empty keys.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for EntryKey<'a> {
    fn from(key: &'a str) -> Self {
        Self::new(key)
    }
}

impl<'a> From<&'a String> for EntryKey<'a> {
    fn from(key: &'a String) -> Self {
        Self::new(key)
    }
}

impl<'a> From<(&'a str, &'a str)> for EntryKey<'a> {
    fn from((key, namespace): (&'a str, &'a str)) -> Self {
        Self::namespaced(key, namespace)
    }
}

impl<'a> From<(&'a str, Option<&'a str>)> for EntryKey<'a> {
    fn from((key, namespace): (&'a str, Option<&'a str>)) -> Self {
        Self { key, namespace }
    }
}

// == Default Key Provider ==
/// Uppercase-normalizes key and namespace and hashes them to 64 bits.
///
/// Keys are therefore case-insensitive. Normalization is full Unicode
/// upper-casing, which may change length: `"straße"`, `"STRASSE"` and
/// `"strasse"` all address the same entry. The string hash writes a terminator
/// after the key, so `("a:b", None)` and `("a", Some("b"))` stay distinct.
pub fn default_key_provider(key: &str, namespace: Option<&str>) -> u64 {
    HASH_STATE.hash_one((key.to_uppercase(), namespace.map(str::to_uppercase)))
}

/// Returns the default provider as a shareable [`KeyProvider`].
pub fn default_provider() -> KeyProvider {
    Arc::new(default_key_provider)
}
