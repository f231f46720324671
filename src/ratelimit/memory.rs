//! In-process bucket store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::bucket::{self, BucketState};
use super::clock::{Clock, SystemClock};
use super::store::{BucketStore, RateLimitResult};
use crate::error::StoreError;

/// Idle time after which a bucket is forgotten.
pub const DEFAULT_BUCKET_TTL_SECS: u64 = 60;

/// Bucket store that keeps state in local memory.
///
/// Takes on the same key are serialized by holding the map entry for the whole
/// refill-and-consume step. State is not shared between processes, so this store
/// only enforces limits correctly for a single instance.
pub struct InMemoryBucketStore {
    buckets: DashMap<String, BucketState>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
}

impl InMemoryBucketStore {
    /// Create a store on the wall clock with the default idle TTL.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_BUCKET_TTL_SECS)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            ttl_secs,
        }
    }

    fn is_expired(&self, state: &BucketState, now: u64) -> bool {
        now.saturating_sub(state.last_time) >= self.ttl_secs
    }

    /// Current state of a live bucket, without refilling it.
    pub fn peek(&self, key: &str) -> Option<BucketState> {
        let now = self.clock.now_secs();
        self.buckets
            .get(key)
            .map(|state| *state)
            .filter(|state| !self.is_expired(state, now))
    }

    /// Drop buckets that have been idle for the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let before = self.buckets.len();
        self.buckets.retain(|_, state| !self.is_expired(state, now));
        before.saturating_sub(self.buckets.len())
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_purger(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, remaining = self.bucket_count(), "Purged idle buckets");
                }
            }
        })
    }

    /// Get the number of buckets held in memory.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Default for InMemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn take(
        &self,
        key: &str,
        amount: u32,
        rate: f64,
        capacity: f64,
    ) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_secs();

        let result = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(*occupied.get()).filter(|state| !self.is_expired(state, now));
                let (next, result) = bucket::take(current, now, amount, rate, capacity);
                occupied.insert(next);
                result
            }
            Entry::Vacant(vacant) => {
                let (next, result) = bucket::take(None, now, amount, rate, capacity);
                vacant.insert(next);
                result
            }
        };

        trace!(
            key = %key,
            amount = amount,
            allowed = result.allowed,
            remaining = result.remaining,
            "In-memory take"
        );

        Ok(result)
    }
}
