//! Cache Optimize Task
//!
//! Background task that periodically runs the cache's optimize pass, the only
//! place TTL expiry and capacity eviction happen.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that periodically optimizes the cache.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between passes. Lookups are never blocked for longer than one pass takes
/// to remove its victims.
///
/// # Arguments
/// * `cache` - shared reference to the cache
/// * `interval` - time between optimize passes
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::<String>::new(1000, Duration::from_secs(300)));
/// let handle = spawn_optimize_task(cache.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_optimize_task<V>(cache: Arc<Cache<V>>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!("Starting cache optimize task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            if cache.optimize() {
                let stats = cache.stats();
                info!(
                    "Cache optimize: {} entries left ({} expired, {} evicted so far)",
                    stats.total_entries, stats.expirations, stats.evictions
                );
            } else {
                debug!("Cache optimize: nothing to remove");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_optimize_task_removes_expired_entries() {
        let cache = Arc::new(Cache::new(0, Duration::from_millis(100)));
        cache.set("expire_soon", "value".to_string());

        let handle = spawn_optimize_task(cache.clone(), Duration::from_millis(50));

        // Wait for entry to expire and a pass to run
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!cache.contains("expire_soon"), "Expired entry should have been removed");
        handle.abort();
    }

    #[tokio::test]
    async fn test_optimize_task_preserves_valid_entries() {
        let cache = Arc::new(Cache::new(0, Duration::from_secs(3600)));
        cache.set("long_lived", "value".to_string());

        let handle = spawn_optimize_task(cache.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.contains("long_lived"), "Valid entry should not be removed");
        handle.abort();
    }

    #[tokio::test]
    async fn test_optimize_task_enforces_capacity() {
        let cache = Arc::new(Cache::new(5, Duration::ZERO));
        for i in 0..20 {
            cache.set(&format!("k{}", i), i);
        }

        let handle = spawn_optimize_task(cache.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.len(), 6);
        handle.abort();
    }

    #[tokio::test]
    async fn test_optimize_task_can_be_aborted() {
        let cache = Arc::new(Cache::<String>::new(10, Duration::from_secs(1)));

        let handle = spawn_optimize_task(cache, Duration::from_secs(1));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
