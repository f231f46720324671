//! Fail-open admission check for a single identity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::identity::bucket_key;
use super::store::{BucketStore, RateLimitResult};
use crate::error::StoreError;

/// Runs one check against a bucket store.
///
/// A broken store never rejects traffic: every store error is logged and
/// turned into an allow decision.
pub struct Guard {
    store: Arc<dyn BucketStore>,
    /// Upper bound for one store call
    timeout: Option<Duration>,
}

impl Guard {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Bound every store call by `timeout`.
    pub fn with_timeout(store: Arc<dyn BucketStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout: Some(timeout),
        }
    }

    /// The time a backend call may take when the caller allows `deadline`.
    pub fn budget(&self, deadline: Option<Duration>) -> Option<Duration> {
        shortest(self.timeout, deadline)
    }

    /// Take one token from `identity`'s bucket.
    pub async fn check(&self, identity: &str, rate: f64, capacity: f64) -> RateLimitResult {
        self.check_within(identity, rate, capacity, None).await
    }

    /// Like [`check`](Self::check), but gives up once `deadline` has elapsed
    /// (or the guard's own timeout, whichever is shorter).
    pub async fn check_within(
        &self,
        identity: &str,
        rate: f64,
        capacity: f64,
        deadline: Option<Duration>,
    ) -> RateLimitResult {
        let key = bucket_key(identity);
        let take = self.store.take(&key, 1, rate, capacity);

        let outcome = match self.budget(deadline) {
            Some(limit) => match tokio::time::timeout(limit, take).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => take.await,
        };

        match outcome {
            Ok(result) => {
                if !result.allowed {
                    debug!(identity = %identity, reset_at = result.reset_at, "Rate limit exceeded");
                }
                result
            }
            Err(err) => {
                error!(
                    identity = %identity,
                    key = %key,
                    error = %err,
                    "Rate limit store error, failing open"
                );
                RateLimitResult::fail_open()
            }
        }
    }
}

fn shortest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::InMemoryBucketStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        async fn take(
            &self,
            _key: &str,
            _amount: u32,
            _rate: f64,
            _capacity: f64,
        ) -> Result<RateLimitResult, StoreError> {
            Err(StoreError::Reply("connection reset".into()))
        }
    }

    /// Never answers.
    struct StalledStore;

    #[async_trait]
    impl BucketStore for StalledStore {
        async fn take(
            &self,
            _key: &str,
            _amount: u32,
            _rate: f64,
            _capacity: f64,
        ) -> Result<RateLimitResult, StoreError> {
            std::future::pending().await
        }
    }

    /// Records the arguments of every take.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(String, u32, f64, f64)>>,
    }

    #[async_trait]
    impl BucketStore for RecordingStore {
        async fn take(
            &self,
            key: &str,
            amount: u32,
            rate: f64,
            capacity: f64,
        ) -> Result<RateLimitResult, StoreError> {
            self.calls.lock().push((key.to_string(), amount, rate, capacity));
            Ok(RateLimitResult {
                allowed: false,
                remaining: 3,
                reset_at: 99,
            })
        }
    }

    #[tokio::test]
    async fn test_passes_store_result_through() {
        let store = Arc::new(RecordingStore::default());
        let guard = Guard::new(store.clone());

        let result = guard.check("alice", 2.0, 8.0).await;
        assert_eq!(
            result,
            RateLimitResult {
                allowed: false,
                remaining: 3,
                reset_at: 99
            }
        );
        assert_eq!(*store.calls.lock(), vec![("user:alice".to_string(), 1, 2.0, 8.0)]);
    }

    #[tokio::test]
    async fn test_fails_open_on_store_error() {
        let guard = Guard::new(Arc::new(FailingStore));

        for _ in 0..3 {
            let result = guard.check("alice", 1.0, 1.0).await;
            assert_eq!(result, RateLimitResult::fail_open());
        }
    }

    #[tokio::test]
    async fn test_fails_open_on_timeout() {
        let guard = Guard::with_timeout(Arc::new(StalledStore), Duration::from_millis(20));
        let result = guard.check("alice", 1.0, 1.0).await;
        assert!(result.allowed);
        assert_eq!(result.reset_at, 0);
    }

    #[tokio::test]
    async fn test_caller_deadline_bounds_the_check() {
        let guard = Guard::new(Arc::new(StalledStore));
        let result = guard
            .check_within("alice", 1.0, 1.0, Some(Duration::from_millis(20)))
            .await;
        assert_eq!(result, RateLimitResult::fail_open());
    }

    #[tokio::test]
    async fn test_enforces_with_healthy_store() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store = Arc::new(InMemoryBucketStore::with_clock(clock, 60));
        let guard = Guard::with_timeout(store, Duration::from_millis(100));

        assert!(guard.check("alice", 1.0, 2.0).await.allowed);
        assert!(guard.check("alice", 1.0, 2.0).await.allowed);
        let denied = guard.check("alice", 1.0, 2.0).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, 1_700_000_002);
    }

    #[test]
    fn test_budget() {
        let ms = Duration::from_millis;
        let guard = Guard::with_timeout(Arc::new(FailingStore), ms(100));
        assert_eq!(guard.budget(None), Some(ms(100)));
        assert_eq!(guard.budget(Some(ms(50))), Some(ms(50)));
        assert_eq!(Guard::new(Arc::new(FailingStore)).budget(None), None);
    }

    #[test]
    fn test_shortest() {
        let ms = Duration::from_millis;
        assert_eq!(shortest(None, None), None);
        assert_eq!(shortest(Some(ms(5)), None), Some(ms(5)));
        assert_eq!(shortest(None, Some(ms(7))), Some(ms(7)));
        assert_eq!(shortest(Some(ms(5)), Some(ms(7))), Some(ms(5)));
    }
}
