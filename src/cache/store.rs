//! Cache Store Module
//!
//! Concurrent get-or-compute cache with access counting, lazy TTL expiry and
//! score-based eviction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use super::eviction::{lowest_ranked, retain_target, split_expired};
use super::stats::StatsRecorder;
use super::{current_timestamp_ms, CacheEntry, CacheStats};
use crate::config::CacheConfig;
use crate::error::{KvError, Result};

/// Producer invoked on a miss with the missing key.
pub type Producer<V> = Arc<dyn Fn(&str) -> Result<V> + Send + Sync>;

// == Cache ==
/// In-process cache placed in front of an expensive producer.
///
/// The map lock only guards inserts and removals; hits take it for reading
/// and then serialize on the entry's own counter lock. Two concurrent misses
/// on one key may both compute; the last one to publish wins.
///
/// TTL is not checked on lookup. An entry older than the TTL is still served
/// until `optimize` removes it.
pub struct Cache<V> {
    /// Published entries
    entries: RwLock<HashMap<String, Arc<CacheEntry<V>>>>,
    /// Default producer for `fetch`
    producer: Option<Producer<V>>,
    /// Eviction target, 0 = unbounded
    max_entries: usize,
    /// Lifetime from last populate, None = no expiry
    ttl: Option<Duration>,
    stats: StatsRecorder,
}

impl<V: Clone> Cache<V> {
    // == Constructor ==
    /// Creates a cache. `max_entries == 0` disables capacity eviction and a
    /// zero `ttl` disables expiry.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            producer: None,
            max_entries,
            ttl: (!ttl.is_zero()).then_some(ttl),
            stats: StatsRecorder::default(),
        }
    }

    /// Creates a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl))
    }

    /// Sets the producer used by `fetch`.
    pub fn with_producer<F>(mut self, producer: F) -> Self
    where
        F: Fn(&str) -> Result<V> + Send + Sync + 'static,
    {
        self.producer = Some(Arc::new(producer));
        self
    }

    fn lookup(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        self.entries.read().get(key).cloned()
    }

    fn hit(&self, key: &str) -> Option<V> {
        let entry = self.lookup(key)?;
        entry.hit();
        self.stats.record_hit();
        Some(entry.value().clone())
    }

    fn publish(&self, key: &str, value: V) {
        let entry = Arc::new(CacheEntry::new(value));
        self.entries.write().insert(key.to_string(), entry);
    }

    // == Get Or Compute ==
    /// Returns the cached value, or computes, publishes and returns it.
    ///
    /// A hit increments the entry's count and never recomputes, even when the
    /// entry is older than the TTL. A producer error publishes nothing.
    pub fn get_or_compute<F>(&self, key: &str, produce: F) -> Result<V>
    where
        F: FnOnce(&str) -> Result<V>,
    {
        if let Some(value) = self.hit(key) {
            return Ok(value);
        }

        self.stats.record_miss();
        let value = produce(key)?;
        self.publish(key, value.clone());
        debug!("Cache populated {}", key);
        Ok(value)
    }

    /// Async variant of `get_or_compute`; no lock is held while `produce` runs.
    pub async fn get_or_compute_async<F, Fut>(&self, key: &str, produce: F) -> Result<V>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.hit(key) {
            return Ok(value);
        }

        self.stats.record_miss();
        let value = produce(key.to_string()).await?;
        self.publish(key, value.clone());
        debug!("Cache populated {}", key);
        Ok(value)
    }

    /// `get_or_compute` with the configured producer.
    pub fn fetch(&self, key: &str) -> Result<V> {
        match self.producer.clone() {
            Some(producer) => self.get_or_compute(key, |k| producer(k)),
            None => {
                if let Some(value) = self.hit(key) {
                    return Ok(value);
                }
                self.stats.record_miss();
                Err(KvError::NoProducer(key.to_string()))
            }
        }
    }

    /// Returns the cached value, or stores `value` as-is on a miss.
    pub fn get_or_insert(&self, key: &str, value: V) -> V {
        if let Some(cached) = self.hit(key) {
            return cached;
        }
        self.stats.record_miss();
        self.publish(key, value.clone());
        value
    }

    // == Set ==
    /// Overwrites the entry, resetting its count to 1 and its timestamp to now.
    pub fn set(&self, key: &str, value: V) -> V {
        self.publish(key, value.clone());
        value
    }

    /// Recomputes with `produce` and overwrites the entry.
    pub fn set_with<F>(&self, key: &str, produce: F) -> Result<V>
    where
        F: FnOnce(&str) -> Result<V>,
    {
        let value = produce(key)?;
        Ok(self.set(key, value))
    }

    // == Remove ==
    /// Removes an entry, failing if it is absent.
    pub fn remove(&self, key: &str) -> Result<()> {
        match self.entries.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(KvError::NotFound(key.to_string())),
        }
    }

    // == Optimize ==
    /// Maintenance pass: drops entries past the TTL, then, when more than
    /// `max_entries` remain, keeps only the `1.2 x max_entries` best scored.
    ///
    /// Ranking works on a snapshot. An entry replaced or removed since the
    /// snapshot is left alone. Returns whether anything was removed.
    pub fn optimize(&self) -> bool {
        let snapshot: Vec<(String, Arc<CacheEntry<V>>)> = self
            .entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), Arc::clone(e)))
            .collect();

        let (live, expired) = match self.ttl {
            Some(ttl) => split_expired(snapshot, ttl.as_millis() as u64, current_timestamp_ms()),
            None => (snapshot, Vec::new()),
        };

        let victims = if self.max_entries > 0 && live.len() > self.max_entries {
            lowest_ranked(live, retain_target(self.max_entries))
        } else {
            Vec::new()
        };

        if expired.is_empty() && victims.is_empty() {
            return false;
        }

        let mut entries = self.entries.write();
        let expired_removed = remove_unchanged(&mut entries, expired);
        let evicted = remove_unchanged(&mut entries, victims);
        let remaining = entries.len();
        drop(entries);

        self.stats.record_expirations(expired_removed);
        self.stats.record_evictions(evicted);
        debug!(
            "Cache optimize: {} expired, {} evicted, {} remaining",
            expired_removed, evicted, remaining
        );
        expired_removed + evicted > 0
    }

    // == Introspection ==
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Access count of an entry without counting as a hit.
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.lookup(key).map(|entry| entry.count())
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Removes each key whose map slot still holds the ranked entry.
fn remove_unchanged<V>(
    entries: &mut HashMap<String, Arc<CacheEntry<V>>>,
    ranked: Vec<(String, Arc<CacheEntry<V>>)>,
) -> usize {
    let mut removed = 0;
    for (key, entry) in ranked {
        if entries
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &entry))
        {
            entries.remove(&key);
            removed += 1;
        }
    }
    removed
}
