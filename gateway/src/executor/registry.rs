//! Pool registry
//!
//! One pool per database id, created lazily and reclaimed when idle. Creation is
//! an atomic get-or-create: concurrent first use converges on a single pool. A
//! pool handed out before a sweep stays usable for that caller, because the
//! registry only drops its own reference.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::QueryPool;
use crate::error::Result;

/// Registry entry
struct PoolEntry {
    /// Pool, initialized once
    cell: Arc<OnceCell<Arc<dyn QueryPool>>>,

    /// Last time the pool was handed out
    last_used: Instant,
}

/// Database id to pool map with idle expiry
pub struct PoolRegistry {
    /// Entries keyed by database id
    entries: Mutex<HashMap<String, PoolEntry>>,

    /// Idle time after which a pool is reclaimed
    idle_ttl: Duration,
}

impl PoolRegistry {
    /// Create an empty registry
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Idle time after which a pool is reclaimed
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Get the pool for a database, creating it with `create` on first use
    ///
    /// `create` runs at most once per pool lifetime even under concurrent calls.
    /// A failed creation leaves the entry empty so the next call retries.
    pub async fn acquire<F, Fut>(&self, database_id: &str, create: F) -> Result<Arc<dyn QueryPool>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn QueryPool>>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();

            let expired = entries
                .get(database_id)
                .map(|entry| now.duration_since(entry.last_used) > self.idle_ttl)
                .unwrap_or(false);
            if expired {
                debug!("Pool for {} expired before reuse, replacing", database_id);
                entries.remove(database_id);
            }

            let entry = entries
                .entry(database_id.to_string())
                .or_insert_with(|| PoolEntry {
                    cell: Arc::new(OnceCell::new()),
                    last_used: now,
                });
            entry.last_used = now;
            entry.cell.clone()
        };

        let pool = cell
            .get_or_try_init(|| async {
                info!("Creating connection pool for {}", database_id);
                create().await
            })
            .await?;
        Ok(pool.clone())
    }

    /// Remove pools idle beyond the TTL, returning how many were removed
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();

        entries.retain(|database_id, entry| {
            let keep = now.duration_since(entry.last_used) <= self.idle_ttl;
            if !keep {
                info!("Closing idle connection pool for {}", database_id);
            }
            keep
        });

        before - entries.len()
    }

    /// Number of registered pools
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no pool is registered
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether a pool is registered for a database
    pub async fn contains(&self, database_id: &str) -> bool {
        self.entries.lock().await.contains_key(database_id)
    }
}

/// Handle to the periodic sweep task; aborts the task when dropped
pub struct ReaperHandle {
    handle: JoinHandle<()>,
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a task that sweeps the registry every `interval`
///
/// The task holds a weak reference and exits once the registry is dropped.
/// Returns `None` outside a tokio runtime.
pub fn spawn_reaper(registry: &Arc<PoolRegistry>, interval: Duration) -> Option<ReaperHandle> {
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!("No tokio runtime; idle pools will only be replaced on next use");
            return None;
        }
    };

    let registry: Weak<PoolRegistry> = Arc::downgrade(registry);
    let handle = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else { break };
            let removed = registry.sweep().await;
            if removed > 0 {
                debug!("Reaper removed {} idle pool(s)", removed);
            }
        }
    });

    Some(ReaperHandle { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::executor::QueryRows;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullPool;

    #[async_trait]
    impl QueryPool for NullPool {
        async fn run_select(
            &self,
            _sql: &str,
            _params: &[serde_json::Value],
            _timeout: Duration,
        ) -> Result<QueryRows> {
            Ok(QueryRows::default())
        }
    }

    fn counting(created: &Arc<AtomicUsize>) -> impl Future<Output = Result<Arc<dyn QueryPool>>> {
        let created = created.clone();
        async move {
            created.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(NullPool) as Arc<dyn QueryPool>)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuse_within_ttl() {
        let registry = PoolRegistry::new(Duration::from_secs(300));
        let created = Arc::new(AtomicUsize::new(0));

        let first = registry.acquire("db1", || counting(&created)).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        let second = registry.acquire("db1", || counting(&created)).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        let third = registry.acquire("db1", || counting(&created)).await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_pool_after_ttl() {
        let registry = PoolRegistry::new(Duration::from_secs(300));
        let created = Arc::new(AtomicUsize::new(0));

        let first = registry.acquire("db1", || counting(&created)).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        let second = registry.acquire("db1", || counting(&created)).await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_pool() {
        let registry = Arc::new(PoolRegistry::new(Duration::from_secs(300)));
        let created = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let created = created.clone();
                tokio::spawn(async move { registry.acquire("db1", || counting(&created)).await.unwrap() })
            })
            .collect();

        let pools = futures_util::future::join_all(tasks).await;
        let first = pools[0].as_ref().unwrap().clone();
        for pool in &pools {
            assert!(Arc::ptr_eq(&first, pool.as_ref().unwrap()));
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried() {
        let registry = PoolRegistry::new(Duration::from_secs(300));

        let err = registry
            .acquire("db1", || async { Err(GatewayError::Connection("refused".into())) })
            .await;
        assert!(err.is_err());

        let created = Arc::new(AtomicUsize::new(0));
        registry.acquire("db1", || counting(&created)).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_handed_out_pool_usable() {
        let registry = PoolRegistry::new(Duration::from_secs(300));
        let created = Arc::new(AtomicUsize::new(0));

        let pool = registry.acquire("db1", || counting(&created)).await.unwrap();
        registry.acquire("db2", || counting(&created)).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        registry.acquire("db2", || counting(&created)).await.unwrap();
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(registry.sweep().await, 1);
        assert!(!registry.contains("db1").await);
        assert!(registry.contains("db2").await);

        let rows = pool.run_select("SELECT 1", &[], Duration::from_secs(1)).await.unwrap();
        assert!(rows.rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_sweeps_periodically() {
        let registry = Arc::new(PoolRegistry::new(Duration::from_secs(300)));
        let created = Arc::new(AtomicUsize::new(0));
        let _reaper = spawn_reaper(&registry, Duration::from_secs(60)).unwrap();

        registry.acquire("db1", || counting(&created)).await.unwrap();
        assert_eq!(registry.len().await, 1);

        for _ in 0..7 {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        assert!(registry.is_empty().await);
    }
}
