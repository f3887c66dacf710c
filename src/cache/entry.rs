//! Cache Entry Module
//!
//! Defines a published cache entry with its access counter and populate time.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

// == Cache Entry ==
/// A fully populated cache entry.
///
/// The value and populate time are fixed once the entry is published; only
/// the access counter changes, under the entry's own lock.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The cached value
    value: V,
    /// Access counter, 1 on populate
    count: Mutex<u64>,
    /// Last populate timestamp (Unix milliseconds)
    populated_at: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry stamped with the current time and a count of 1.
    pub fn new(value: V) -> Self {
        Self::populated_at(value, current_timestamp_ms())
    }

    /// Creates an entry with an explicit populate time.
    pub fn populated_at(value: V, timestamp_ms: u64) -> Self {
        Self {
            value,
            count: Mutex::new(1),
            populated_at: timestamp_ms,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    // == Hit ==
    /// Records an access and returns the new count.
    pub fn hit(&self) -> u64 {
        let mut count = self.count.lock();
        *count += 1;
        *count
    }

    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    pub fn timestamp(&self) -> u64 {
        self.populated_at
    }

    // == Age ==
    /// Milliseconds since the entry was populated. Hits do not reset this.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.populated_at)
    }

    // == Score ==
    /// Recency-weighted frequency: access count times populate timestamp.
    pub fn score(&self) -> u128 {
        self.count() as u128 * self.populated_at as u128
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
