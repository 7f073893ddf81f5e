//! Cooperative stop checks for running chunk workers
//!
//! Workers ask [`StopSignal::should_stop`] before each row. The answer comes
//! from the job store but is cached per job for a short TTL, so a stop is
//! observed at most one TTL late and the store is not hit once per row.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::error::SyncResult;
use super::types::JobKey;
use crate::db::JobStore;

const MAX_CACHED_JOBS: u64 = 10_000;

pub struct StopSignal {
    store: Arc<dyn JobStore>,
    cache: Option<Cache<JobKey, bool>>,
}

impl StopSignal {
    /// A zero `ttl` disables caching entirely
    pub fn new(store: Arc<dyn JobStore>, ttl: Duration) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_CACHED_JOBS)
                .time_to_live(ttl)
                .build()
        });
        Self { store, cache }
    }

    pub async fn should_stop(&self, key: JobKey) -> SyncResult<bool> {
        let Some(cache) = &self.cache else {
            return self.lookup(key).await;
        };

        if let Some(stop) = cache.get(&key).await {
            return Ok(stop);
        }

        let stop = self.lookup(key).await?;
        cache.insert(key, stop).await;
        Ok(stop)
    }

    /// Drop the cached answer so the next check reads the store
    pub async fn forget(&self, key: JobKey) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&key).await;
        }
    }

    async fn lookup(&self, key: JobKey) -> SyncResult<bool> {
        Ok(self.store.get(key).await?.status.should_stop())
    }
}
