//! Bucket store trait for abstracting in-process and shared implementations.

use async_trait::async_trait;

use crate::error::StoreError;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left in the bucket after this check
    pub remaining: u64,
    /// Epoch second at which the bucket will be full again
    pub reset_at: u64,
}

impl RateLimitResult {
    /// Decision used when the store could not be consulted.
    pub fn fail_open() -> Self {
        Self {
            allowed: true,
            remaining: 0,
            reset_at: 0,
        }
    }
}

/// Trait for token bucket stores.
///
/// Each `take` is atomic per key: concurrent takes on the same key behave as if
/// they ran one after another, so no token is ever spent twice.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Refill the bucket at `key`, then try to remove `amount` tokens from it.
    ///
    /// A bucket that does not exist yet starts full.
    async fn take(
        &self,
        key: &str,
        amount: u32,
        rate: f64,
        capacity: f64,
    ) -> Result<RateLimitResult, StoreError>;
}
