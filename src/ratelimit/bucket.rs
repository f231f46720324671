//! Token bucket arithmetic.
//!
//! The in-process store runs this directly; the Redis script in
//! `redis_store` performs the same steps inside the backend.

use super::store::RateLimitResult;

/// Longest wait ever reported in `reset_at`.
///
/// A tiny rate would otherwise push the reset time past what an epoch second
/// can hold.
pub const MAX_RESET_SECS: u64 = u32::MAX as u64;

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, possibly fractional
    pub tokens: f64,
    /// Epoch second of the last take
    pub last_time: u64,
}

impl BucketState {
    /// A bucket that has never been used.
    pub fn full(capacity: f64, now: u64) -> Self {
        Self {
            tokens: capacity,
            last_time: now,
        }
    }
}

/// Refill `state` up to `now`, then try to spend `amount` tokens.
///
/// Returns the state to persist and the decision. A clock that moved backwards
/// refills nothing. `reset_at` is the second at which the bucket would be full
/// again, not when the next single token arrives.
pub fn take(
    state: Option<BucketState>,
    now: u64,
    amount: u32,
    rate: f64,
    capacity: f64,
) -> (BucketState, RateLimitResult) {
    let state = state.unwrap_or_else(|| BucketState::full(capacity, now));

    let elapsed = now.saturating_sub(state.last_time) as f64;
    let mut tokens = (state.tokens + elapsed * rate).min(capacity);

    let amount = f64::from(amount);
    let allowed = tokens >= amount;
    if allowed {
        tokens -= amount;
    }

    let missing = (capacity - tokens).max(0.0);
    let reset_in = (missing / rate).ceil().min(MAX_RESET_SECS as f64) as u64;

    // Never move the refill timestamp backwards.
    let last_time = now.max(state.last_time);

    (
        BucketState { tokens, last_time },
        RateLimitResult {
            allowed,
            remaining: tokens.max(0.0).floor() as u64,
            reset_at: now.saturating_add(reset_in),
        },
    )
}
