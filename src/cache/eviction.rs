//! Eviction Module
//!
//! Picks entries to drop during an optimize pass: first by TTL age, then by
//! recency-weighted frequency score when the cache is over capacity.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::CacheEntry;

/// Entries kept after a capacity pass, 1.2x the configured maximum (floored).
pub fn retain_target(max_entries: usize) -> usize {
    max_entries + max_entries / 5
}

// == Expired ==
/// Splits out entries older than `ttl_ms`, measured from their populate time.
pub fn split_expired<V>(
    entries: Vec<(String, Arc<CacheEntry<V>>)>,
    ttl_ms: u64,
    now_ms: u64,
) -> (Vec<(String, Arc<CacheEntry<V>>)>, Vec<(String, Arc<CacheEntry<V>>)>) {
    entries
        .into_iter()
        .partition(|(_, entry)| entry.age_ms(now_ms) <= ttl_ms)
}

// == Lowest Ranked ==
/// Returns the entries outside the `keep` highest scores.
///
/// A min-heap bounded at `keep` holds the current best entries; anything
/// pushed out of it is a victim. Ties break on key so the result is stable.
pub fn lowest_ranked<V>(
    entries: Vec<(String, Arc<CacheEntry<V>>)>,
    keep: usize,
) -> Vec<(String, Arc<CacheEntry<V>>)> {
    if entries.len() <= keep {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(keep + 1);
    let mut victims = Vec::with_capacity(entries.len() - keep);

    for (index, (key, entry)) in entries.iter().enumerate() {
        heap.push(Reverse((entry.score(), key.as_str(), index)));
        if heap.len() > keep {
            if let Some(Reverse((_, _, lowest))) = heap.pop() {
                victims.push(lowest);
            }
        }
    }

    victims
        .into_iter()
        .map(|index| entries[index].clone())
        .collect()
}
