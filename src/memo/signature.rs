//! Memo key derivation.
//!
//! A memo key is 32 hex digits: the function identity followed by the hash of
//! the argument tuple. Argument hashing goes through [`Hash`], so byte buffers
//! and strings hash by content and `None` hashes to its own sentinel.

use std::any::type_name;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::key::HASH_STATE;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Identity of a function derived from its type and signature.
///
/// Closures built by the same expression share a type, whatever they
/// captured, so this alone does not tell two such closures apart.
pub fn function_identity<F, A, R>() -> u64 {
    HASH_STATE.hash_one((type_name::<F>(), type_name::<A>(), type_name::<R>()))
}

/// Identity unique to one memoized wrapper: the function identity mixed with
/// a process-wide instance counter.
pub(crate) fn instance_identity<F, A, R>() -> u64 {
    let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
    HASH_STATE.hash_one((function_identity::<F, A, R>(), instance))
}

pub(crate) fn named_identity(name: &str) -> u64 {
    HASH_STATE.hash_one(("memoized", name))
}

/// Hash of an argument tuple.
pub fn argument_hash<A: Hash + ?Sized>(args: &A) -> u64 {
    HASH_STATE.hash_one(args)
}

/// Cache key of a call with `args` to the function with `identity`.
pub fn memo_key<A: Hash + ?Sized>(identity: u64, args: &A) -> String {
    format!("{identity:016x}{:016x}", argument_hash(args))
}
