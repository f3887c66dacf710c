//! Cache Module
//!
//! Provides an in-process get-or-compute cache with access counting,
//! TTL expiry and recency-weighted frequency eviction.

mod entry;
mod eviction;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use eviction::retain_target;
pub use stats::CacheStats;
pub use store::{Cache, Producer};
