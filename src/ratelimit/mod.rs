//! Token bucket enforcement: stores, limit lookup and the fail-open guard.

mod bucket;
mod clock;
mod config_store;
mod guard;
mod identity;
mod memory;
mod redis_store;
mod static_config;
mod store;

pub use bucket::BucketState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config_store::{ConfigSource, RedisConfigStore, UserConfig};
pub use guard::Guard;
pub use identity::{Identity, ANONYMOUS};
pub use memory::{InMemoryBucketStore, DEFAULT_BUCKET_TTL_SECS};
pub use redis_store::{connect, RedisBucketStore};
pub use static_config::StaticConfigStore;
pub use store::{BucketStore, RateLimitResult};
