//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check store behavior against a simple map model.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crate::cache::{default_provider, Cache, CacheStore, EntryKey, Invalidation};
use crate::config::CacheConfig;

// == Strategies ==
/// Generates valid cache keys. Lowercase only, since keys compare
/// case-insensitively and the model map does not.
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_:]{1,24}"
}

fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,64}"
}

fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Add { key: String, value: String },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Add { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

fn cache() -> Cache {
    Cache::new(CacheConfig::default().with_cleanup(false)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Property 1: Model Agreement**
    // *For any* sequence of operations on non-expiring entries, reads, add results,
    // removals and statistics SHALL match a plain map driven by the same sequence.
    #[test]
    fn prop_matches_map_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let store = CacheStore::new(default_provider());
        let mut model: HashMap<String, String> = HashMap::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    store.set(EntryKey::new(&key), value.clone(), Invalidation::Never).unwrap();
                    model.insert(key, value);
                }
                CacheOp::Add { key, value } => {
                    let added = store.add(EntryKey::new(&key), value.clone(), Invalidation::Never).unwrap();
                    prop_assert_eq!(added, !model.contains_key(&key));
                    model.entry(key).or_insert(value);
                }
                CacheOp::Get { key } => {
                    let found = store.try_get::<String>(EntryKey::new(&key)).unwrap();
                    match model.get(&key) {
                        Some(expected) => {
                            expected_hits += 1;
                            prop_assert_eq!(found.as_ref(), Some(expected));
                        }
                        None => {
                            expected_misses += 1;
                            prop_assert!(found.is_none());
                        }
                    }
                }
                CacheOp::Remove { key } => {
                    let removed = store.remove(EntryKey::new(&key)).unwrap();
                    prop_assert_eq!(removed.is_some(), model.remove(&key).is_some());
                }
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, model.len(), "Total entries mismatch");

        let keys: HashSet<String> = store.keys(None).into_iter().collect();
        let expected: HashSet<String> = model.keys().cloned().collect();
        prop_assert_eq!(keys, expected);
    }

    // **Property 2: Round-trip Storage Consistency**
    // *For any* key and value, storing then reading SHALL return an equal value.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in valid_value_strategy()) {
        let cache = cache();
        cache.set(key.as_str(), value.clone(), Invalidation::Never).unwrap();

        let retrieved = cache.try_get::<String>(key.as_str()).unwrap();
        prop_assert_eq!(retrieved, Some(value));
    }

    // **Property 3: Case-insensitive Keys**
    // *For any* key, the upper-case spelling SHALL address the same entry.
    #[test]
    fn prop_keys_ignore_case(key in valid_key_strategy(), value in valid_value_strategy()) {
        let cache = cache();
        cache.set(key.as_str(), value.clone(), Invalidation::Never).unwrap();

        let upper = key.to_uppercase();
        prop_assert_eq!(cache.try_get::<String>(upper.as_str()).unwrap(), Some(value));
        prop_assert_eq!(cache.count(None), 1);
    }

    // **Property 4: Idempotent Remove**
    // *For any* stored key, the first remove SHALL return the entry and any
    // further remove SHALL return nothing.
    #[test]
    fn prop_remove_is_idempotent(key in valid_key_strategy(), value in valid_value_strategy()) {
        let cache = cache();
        cache.set(key.as_str(), value, Invalidation::Never).unwrap();

        prop_assert!(cache.remove(key.as_str()).unwrap().is_some());
        prop_assert!(cache.remove(key.as_str()).unwrap().is_none());
        prop_assert!(!cache.contains(key.as_str()).unwrap());
    }

    // **Property 5: Namespace Isolation**
    // *For any* key held in two namespaces, each namespace SHALL keep its own
    // value and clearing one SHALL leave the other untouched.
    #[test]
    fn prop_namespace_isolation(
        key in valid_key_strategy(),
        first in namespace_strategy(),
        second in namespace_strategy(),
    ) {
        prop_assume!(first != second);
        let cache = cache();
        cache.set((key.as_str(), first.as_str()), 1u32, Invalidation::Never).unwrap();
        cache.set((key.as_str(), second.as_str()), 2u32, Invalidation::Never).unwrap();
        cache.set(key.as_str(), 3u32, Invalidation::Never).unwrap();

        prop_assert_eq!(cache.try_get::<u32>((key.as_str(), first.as_str())).unwrap(), Some(1));
        prop_assert_eq!(cache.try_get::<u32>((key.as_str(), second.as_str())).unwrap(), Some(2));
        prop_assert_eq!(cache.try_get::<u32>(key.as_str()).unwrap(), Some(3));

        prop_assert_eq!(cache.clear(Some(first.as_str())), 1);
        prop_assert_eq!(cache.count(Some(first.as_str())), 0);
        prop_assert_eq!(cache.count(Some(second.as_str())), 1);
        prop_assert_eq!(cache.count(None), 2);
    }

    // **Property 6: Memoization Determinism**
    // *For any* argument list, a memoized function SHALL return what the
    // function returns and SHALL run once per distinct argument.
    #[test]
    fn prop_memoized_matches_function(args in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..8), 1..30)) {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let checksum = |bytes: &[u8]| bytes.iter().fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(*b)));
        let memoized = cache.memoize(|(bytes,): (Vec<u8>,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            checksum(&bytes)
        });

        for bytes in &args {
            prop_assert_eq!(memoized.call((bytes.clone(),)).unwrap(), checksum(bytes));
        }

        let distinct: HashSet<&Vec<u8>> = args.iter().collect();
        prop_assert_eq!(calls.load(Ordering::SeqCst), distinct.len());
    }
}

// Separate proptest block with fewer cases for time-sensitive expiry tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // **Property 7: Expiration Behavior**
    // *For any* entry stored with an absolute or sliding policy, once the policy
    // has elapsed without access the entry SHALL no longer be readable.
    #[test]
    fn prop_expired_entries_unreadable(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        sliding in any::<bool>(),
    ) {
        let cache = cache();
        let window = Duration::from_millis(50);
        let invalidation = if sliding {
            Invalidation::sliding(window).unwrap()
        } else {
            Invalidation::absolute_in(window)
        };
        cache.set(key.as_str(), value.clone(), invalidation).unwrap();
        prop_assert_eq!(cache.try_get::<String>(key.as_str()).unwrap(), Some(value));

        sleep(Duration::from_millis(120));

        prop_assert!(!cache.contains(key.as_str()).unwrap());
        prop_assert!(cache.try_get::<String>(key.as_str()).unwrap().is_none());
        prop_assert_eq!(cache.count(None), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // **Property 8: Single-flight Production**
    // *For any* set of keys requested concurrently from several threads, each
    // key's producer SHALL run exactly once and every caller SHALL see its value.
    #[test]
    fn prop_single_flight_per_key(keys in prop::collection::hash_set(valid_key_strategy(), 1..8)) {
        let store = CacheStore::new(default_provider());
        let calls: Arc<HashMap<String, AtomicUsize>> = Arc::new(
            keys.iter().map(|k| (k.clone(), AtomicUsize::new(0))).collect(),
        );

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for key in &keys {
                        let value = store
                            .get_or_try_add(
                                EntryKey::new(key),
                                || {
                                    calls[key].fetch_add(1, Ordering::SeqCst);
                                    sleep(Duration::from_millis(2));
                                    Ok::<_, std::convert::Infallible>(key.len())
                                },
                                Invalidation::default,
                            )
                            .unwrap();
                        assert_eq!(value, key.len());
                    }
                });
            }
        });

        for key in &keys {
            prop_assert_eq!(calls[key].load(Ordering::SeqCst), 1, "Producer for {} ran more than once", key);
        }
    }
}
