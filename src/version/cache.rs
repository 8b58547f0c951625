//! In-memory TTL cache with fetch-on-miss
//!
//! Values are loaded through an injected [`CacheHandler`] and kept for a fixed
//! TTL. Expired entries are refreshed on the next `get` and removed by the
//! garbage collector. Concurrent misses on the same key are not deduplicated:
//! each caller runs its own fetch and the last successful one wins.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::version::error::{CacheError, RegistryError};

/// Keys removed per lock acquisition during a sweep
const GC_BATCH_SIZE: usize = 256;

/// Loads the value for a key on cache miss
#[async_trait::async_trait]
pub trait CacheHandler: Send + Sync {
    type Value: Clone + Send + Sync;
    type Args: Send + Sync;

    async fn fetch(&self, args: &Self::Args) -> Result<Self::Value, RegistryError>;
}

struct CacheEntry<T> {
    timestamp: Instant,
    value: T,
}

pub struct Cache<H: CacheHandler> {
    ttl: Duration,
    handler: H,
    entries: Mutex<HashMap<String, CacheEntry<H::Value>>>,
}

impl<H: CacheHandler> Cache<H> {
    pub fn new(ttl: Duration, handler: H) -> Self {
        Self {
            ttl,
            handler,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire the entry map lock with proper error handling
    fn lock_entries(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, CacheEntry<H::Value>>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn is_fresh(&self, entry: &CacheEntry<H::Value>, now: Instant) -> bool {
        match entry.timestamp.checked_add(self.ttl) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Return the cached value for `key`, fetching it with `args` when the
    /// entry is missing or stale.
    ///
    /// A failed or cancelled fetch leaves the existing entry untouched.
    pub async fn get(
        &self,
        token: &CancellationToken,
        key: &str,
        args: &H::Args,
    ) -> Result<H::Value, CacheError> {
        {
            let entries = self.lock_entries()?;
            if let Some(entry) = entries.get(key)
                && self.is_fresh(entry, Instant::now())
            {
                debug!("Cache hit for key {}", key);
                return Ok(entry.value.clone());
            }
        }

        debug!("Cache miss for key {}, fetching", key);
        let value = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Fetch for key {} cancelled", key);
                return Err(CacheError::Cancelled);
            }
            result = self.handler.fetch(args) => result?,
        };

        self.lock_entries()?.insert(
            key.to_string(),
            CacheEntry {
                timestamp: Instant::now(),
                value: value.clone(),
            },
        );

        Ok(value)
    }

    /// Overwrite the value for `key` without fetching
    pub fn update(&self, key: &str, value: H::Value) -> Result<(), CacheError> {
        self.lock_entries()?.insert(
            key.to_string(),
            CacheEntry {
                timestamp: Instant::now(),
                value,
            },
        );
        Ok(())
    }

    /// Evict `key`, returning whether an entry was present
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock_entries()?.remove(key).is_some())
    }

    /// Flush every entry
    pub fn shutdown(&self) -> Result<(), CacheError> {
        let mut entries = self.lock_entries()?;
        info!("Flushing {} cache entries", entries.len());
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock_entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.lock_entries()?.is_empty())
    }

    /// Remove expired entries, returning how many were removed.
    ///
    /// Expired keys are collected under one short lock and removed in batches;
    /// an entry refreshed in between is kept.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let now = Instant::now();

        let expired: Vec<String> = self
            .lock_entries()?
            .iter()
            .filter(|(_, entry)| !self.is_fresh(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for batch in expired.chunks(GC_BATCH_SIZE) {
            let mut entries = self.lock_entries()?;
            for key in batch {
                if entries
                    .get(key)
                    .is_some_and(|entry| !self.is_fresh(entry, now))
                {
                    entries.remove(key);
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Sweep expired entries every `gc_interval` until `token` is cancelled
    pub async fn start_garbage_collector(&self, gc_interval: Duration, token: CancellationToken) {
        if gc_interval.is_zero() {
            warn!("Cache garbage collector disabled: interval is zero");
            return;
        }
        info!("Starting cache garbage collector every {:?}", gc_interval);

        let mut ticker = tokio::time::interval(gc_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Stopping cache garbage collector");
                    return;
                }
                _ = ticker.tick() => match self.sweep() {
                    Ok(0) => {}
                    Ok(removed) => debug!("Garbage collected {} expired cache entries", removed),
                    Err(e) => error!("Cache garbage collection failed: {}", e),
                },
            }
        }
    }
}
