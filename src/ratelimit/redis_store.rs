//! Shared bucket store backed by Redis.
//!
//! The whole refill, consume and persist sequence runs as one Lua script, so
//! every Tollgate instance pointed at the same Redis sees a single serial order
//! of takes per key.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use tracing::{debug, info, trace};

use super::bucket::MAX_RESET_SECS;
use super::clock::{Clock, SystemClock};
use super::memory::DEFAULT_BUCKET_TTL_SECS;
use super::store::{BucketStore, RateLimitResult};
use crate::config::BackendConfig;
use crate::error::{Result, StoreError};

/// Token bucket take, executed atomically by Redis.
///
/// KEYS[1] bucket hash; ARGV: now, rate, capacity, amount, ttl, max reset.
/// Returns {allowed, floor(tokens), reset_at}.
const TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local amount = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
local max_reset = tonumber(ARGV[6])

local bucket = redis.call('HMGET', key, 'tokens', 'last_time')
local tokens = tonumber(bucket[1]) or capacity
local last_time = tonumber(bucket[2]) or now

tokens = math.min(capacity, tokens + math.max(0, now - last_time) * rate)

local allowed = 0
if tokens >= amount then
    tokens = tokens - amount
    allowed = 1
end

redis.call('HSET', key, 'tokens', string.format('%.17g', tokens), 'last_time', math.max(now, last_time))
redis.call('EXPIRE', key, ttl)

local reset_in = math.min(max_reset, math.ceil(math.max(0, capacity - tokens) / rate))
return {allowed, math.floor(tokens), now + reset_in}
"#;

/// Open a managed connection to Redis and make sure it answers.
///
/// The connection manager reconnects on its own; it is meant to be created
/// once at startup and cloned into every store that needs it.
pub async fn connect(config: &BackendConfig) -> Result<ConnectionManager> {
    let mut info = config.redis_url.as_str().into_connection_info()?;
    if let Some(password) = &config.password {
        info.redis.password = Some(password.clone());
    }

    let client = redis::Client::open(info)?;
    let mut conn = ConnectionManager::new(client).await?;

    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!(reply = %pong, "Connected to Redis");

    Ok(conn)
}

/// Bucket store whose state lives in Redis hashes (`tokens`, `last_time`).
pub struct RedisBucketStore {
    conn: ConnectionManager,
    script: Script,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
}

impl RedisBucketStore {
    /// Create a store on the wall clock with the default idle TTL.
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_clock(conn, Arc::new(SystemClock), DEFAULT_BUCKET_TTL_SECS)
    }

    pub fn with_clock(conn: ConnectionManager, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            conn,
            script: Script::new(TAKE_SCRIPT),
            clock,
            ttl_secs,
        }
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn take(
        &self,
        key: &str,
        amount: u32,
        rate: f64,
        capacity: f64,
    ) -> std::result::Result<RateLimitResult, StoreError> {
        let now = self.clock.now_secs();
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(now)
            .arg(rate)
            .arg(capacity)
            .arg(amount)
            .arg(self.ttl_secs)
            .arg(MAX_RESET_SECS)
            .invoke_async(&mut conn)
            .await?;

        let result = decode_reply(&reply)?;

        trace!(
            key = %key,
            amount = amount,
            allowed = result.allowed,
            remaining = result.remaining,
            reset_at = result.reset_at,
            "Redis take"
        );
        if !result.allowed {
            debug!(key = %key, reset_at = result.reset_at, "Bucket exhausted");
        }

        Ok(result)
    }
}

/// Turn the script's `{allowed, remaining, reset_at}` reply into a result.
fn decode_reply(reply: &[i64]) -> std::result::Result<RateLimitResult, StoreError> {
    match *reply {
        [allowed, remaining, reset_at] if remaining >= 0 && reset_at >= 0 => Ok(RateLimitResult {
            allowed: allowed == 1,
            remaining: remaining as u64,
            reset_at: reset_at as u64,
        }),
        _ => Err(StoreError::Reply(format!("{:?}", reply))),
    }
}
