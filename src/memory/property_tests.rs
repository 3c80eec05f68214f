//! Property-Based Tests for the Memory Module
//!
//! Uses proptest to check the LRU invariants against a simple model.

use proptest::prelude::*;
use std::collections::HashMap;

use crate::config::MemoryCacheConfig;
use crate::memory::MemoryCache;

// == Strategies ==
/// Small key space so operations collide often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-f]{1,2}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: u32, cost: usize },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), any::<u32>(), 0usize..100)
            .prop_map(|(key, value, cost)| CacheOp::Set { key, value, cost }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

fn unbounded() -> MemoryCache<String, u32> {
    MemoryCache::new(MemoryCacheConfig::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // For any sequence of set/get/remove, a lookup returns the most recently
    // set value, or nothing after a remove or when never set.
    #[test]
    fn prop_last_write_wins(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let cache = unbounded();
        let mut model: HashMap<String, u32> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { key, value, cost } => {
                    cache.set_with_cost(key.clone(), value, cost);
                    model.insert(key, value);
                }
                CacheOp::Get { key } => {
                    prop_assert_eq!(cache.get(key.as_str()), model.get(&key).copied());
                }
                CacheOp::Remove { key } => {
                    cache.remove(key.as_str());
                    model.remove(&key);
                }
            }
        }

        prop_assert_eq!(cache.total_count(), model.len());
    }

    // After every set the count grows by at most one and the total cost
    // equals the sum of the live entries' costs.
    #[test]
    fn prop_totals_track_entries(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let cache = unbounded();
        let mut costs: HashMap<String, usize> = HashMap::new();

        for op in ops {
            let count_before = cache.total_count();
            match op {
                CacheOp::Set { key, value, cost } => {
                    cache.set_with_cost(key.clone(), value, cost);
                    costs.insert(key, cost);
                    prop_assert!(cache.total_count() <= count_before + 1);
                }
                CacheOp::Get { key } => {
                    cache.get(key.as_str());
                }
                CacheOp::Remove { key } => {
                    cache.remove(key.as_str());
                    costs.remove(&key);
                }
            }
            prop_assert_eq!(cache.total_cost(), costs.values().sum::<usize>());
            prop_assert_eq!(cache.keys().len(), cache.total_count());
        }
    }

    // trimToCount(n) keeps exactly min(n, count) entries, and they are the
    // most recently used ones.
    #[test]
    fn prop_trim_to_count_keeps_most_recent(
        ops in prop::collection::vec(cache_op_strategy(), 1..80),
        limit in 0usize..12
    ) {
        let cache = unbounded();
        for op in ops {
            match op {
                CacheOp::Set { key, value, cost } => cache.set_with_cost(key, value, cost),
                CacheOp::Get { key } => { cache.get(key.as_str()); }
                CacheOp::Remove { key } => cache.remove(key.as_str()),
            }
        }

        let recency_before = cache.keys();
        let count_before = recency_before.len();

        cache.trim_to_count(limit);

        let expected: Vec<String> = recency_before.into_iter().take(limit).collect();
        prop_assert_eq!(cache.total_count(), limit.min(count_before));
        prop_assert_eq!(cache.keys(), expected);
    }

    // trimToCost(c) leaves total cost at or below c, evicting only from the
    // least recently used end.
    #[test]
    fn prop_trim_to_cost_respects_budget(
        entries in prop::collection::vec((key_strategy(), 0usize..50), 1..40),
        budget in 0usize..200
    ) {
        let cache = unbounded();
        for (key, cost) in entries {
            cache.set_with_cost(key, 0, cost);
        }
        let recency_before = cache.keys();

        cache.trim_to_cost(budget);

        prop_assert!(cache.total_cost() <= budget);
        let kept = cache.keys();
        prop_assert_eq!(&recency_before[..kept.len()], &kept[..]);
    }

    // The configured count limit is never exceeded by set alone.
    #[test]
    fn prop_count_limit_enforced(
        keys in prop::collection::vec(key_strategy(), 1..100),
        limit in 1usize..10
    ) {
        let cache = MemoryCache::new(MemoryCacheConfig {
            count_limit: limit,
            ..MemoryCacheConfig::default()
        });

        for (i, key) in keys.into_iter().enumerate() {
            cache.set(key, i as u32);
            prop_assert!(cache.total_count() <= limit);
        }
    }
}
