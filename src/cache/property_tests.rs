//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check get-or-compute, overwrite and eviction behavior.

use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

use crate::cache::Cache;
use crate::error::Result;

// == Strategies ==
/// Generates cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}".prop_map(|s| s)
}

/// Generates cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}".prop_map(|s| s)
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

fn unbounded() -> Cache<String> {
    Cache::new(0, Duration::ZERO)
}

fn constant(value: &str) -> impl FnOnce(&str) -> Result<String> + '_ {
    move |_: &str| Ok(value.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Hits and misses reported by stats match what each lookup observed.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let cache = unbounded();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    cache.set(&key, value);
                }
                CacheOp::Get { key } => {
                    if cache.contains(&key) {
                        expected_hits += 1;
                    } else {
                        expected_misses += 1;
                    }
                    cache.get_or_compute(&key, constant("computed")).unwrap();
                }
                CacheOp::Remove { key } => {
                    let _ = cache.remove(&key);
                }
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, cache.len(), "Total entries mismatch");
    }

    // A computed value is returned unchanged by every later lookup.
    #[test]
    fn prop_computed_value_is_stable(key in valid_key_strategy(), value in valid_value_strategy()) {
        let cache = unbounded();

        let first = cache.get_or_compute(&key, constant(&value)).unwrap();
        let second = cache.get_or_compute(&key, constant("other")).unwrap();
        prop_assert_eq!(&first, &value);
        prop_assert_eq!(&second, &value);
    }

    // Set always overwrites and resets the access count.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in valid_value_strategy(),
        value2 in valid_value_strategy(),
        hits in 0usize..10
    ) {
        let cache = unbounded();
        cache.set(&key, value1);
        for _ in 0..hits {
            cache.get_or_compute(&key, constant("unused")).unwrap();
        }

        cache.set(&key, value2.clone());

        prop_assert_eq!(cache.hit_count(&key), Some(1));
        prop_assert_eq!(cache.get_or_compute(&key, constant("unused")).unwrap(), value2);
        prop_assert_eq!(cache.len(), 1, "Should have exactly one entry after overwrite");
    }

    // After optimize the cache holds at most 1.2x capacity, and the most
    // accessed key survives.
    #[test]
    fn prop_eviction_bound_keeps_hottest(
        keys in prop::collection::hash_set(valid_key_strategy(), 2..40),
        max_entries in 1usize..10,
        hot_hits in 20usize..40
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let cache = Cache::new(max_entries, Duration::ZERO);
        for key in &keys {
            cache.set(key, "v".to_string());
        }

        let hot = keys[keys.len() - 1].clone();
        for _ in 0..hot_hits {
            cache.get_or_compute(&hot, constant("unused")).unwrap();
        }

        cache.optimize();

        prop_assert!(cache.len() <= (max_entries * 6).div_ceil(5));
        prop_assert!(cache.contains(&hot), "Hottest key '{}' was evicted", hot);
    }

    // Optimize without TTL and within capacity never removes anything.
    #[test]
    fn prop_optimize_noop_within_capacity(keys in prop::collection::hash_set(valid_key_strategy(), 0..20)) {
        let cache = Cache::new(20, Duration::ZERO);
        for key in &keys {
            cache.set(key, "v".to_string());
        }

        prop_assert!(!cache.optimize());
        let present: HashSet<String> = keys.iter().filter(|k| cache.contains(k)).cloned().collect();
        prop_assert_eq!(present, keys);
    }
}
