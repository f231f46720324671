//! Per-identity limit configuration.
//!
//! Lookups never fail the caller: anything that goes wrong while reading a
//! record resolves to the configured default limits.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::identity::config_key;

/// Limits applied to one identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Maximum burst size
    pub capacity: f64,
}

impl UserConfig {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity }
    }

    /// Both values must be finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.rate.is_finite() && self.rate > 0.0 && self.capacity.is_finite() && self.capacity > 0.0
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            capacity: 50.0,
        }
    }
}

/// Resolves an identity to its limits.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get_user_config(&self, identity: &str) -> UserConfig;

    /// Limits used when a lookup cannot finish in time.
    fn default_config(&self) -> UserConfig {
        UserConfig::default()
    }
}

/// Reads JSON records (`{"rate": .., "capacity": ..}`) stored at
/// `config:user:<identity>` by an external system.
pub struct RedisConfigStore {
    conn: ConnectionManager,
    default: UserConfig,
}

impl RedisConfigStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_default(conn, UserConfig::default())
    }

    pub fn with_default(conn: ConnectionManager, default: UserConfig) -> Self {
        Self { conn, default }
    }
}

#[async_trait]
impl ConfigSource for RedisConfigStore {
    async fn get_user_config(&self, identity: &str) -> UserConfig {
        let key = config_key(identity);
        let mut conn = self.conn.clone();

        let raw: redis::RedisResult<Option<String>> =
            redis::cmd("GET").arg(&key).query_async(&mut conn).await;

        resolve_user_config(&key, raw, self.default)
    }

    fn default_config(&self) -> UserConfig {
        self.default
    }
}

/// Resolve the outcome of a `GET`, falling back to `default` on any error.
fn resolve_user_config(
    key: &str,
    raw: redis::RedisResult<Option<String>>,
    default: UserConfig,
) -> UserConfig {
    match raw {
        Ok(raw) => decode_user_config(key, raw.as_deref(), default),
        Err(e) => {
            warn!(key = %key, error = %e, "Config lookup failed, using default limits");
            default
        }
    }
}

/// Parse a stored record, falling back to `default` when it is absent, malformed
/// or carries non-positive limits.
fn decode_user_config(key: &str, raw: Option<&str>, default: UserConfig) -> UserConfig {
    let Some(raw) = raw else {
        return default;
    };

    match serde_json::from_str::<UserConfig>(raw) {
        Ok(config) if config.is_valid() => config,
        Ok(config) => {
            warn!(
                key = %key,
                rate = config.rate,
                capacity = config.capacity,
                "Config record has non-positive limits, using default limits"
            );
            default
        }
        Err(e) => {
            debug!(key = %key, error = %e, "Config record is not valid JSON, using default limits");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "config:user:alice";

    #[test]
    fn test_default_limits() {
        let config = UserConfig::default();
        assert_eq!(config, UserConfig::new(10.0, 50.0));
        assert!(config.is_valid());
    }

    #[test]
    fn test_decode_valid_record() {
        let config = decode_user_config(KEY, Some(r#"{"rate": 2.5, "capacity": 5}"#), UserConfig::default());
        assert_eq!(config, UserConfig::new(2.5, 5.0));
    }

    #[test]
    fn test_absent_record_uses_default() {
        assert_eq!(decode_user_config(KEY, None, UserConfig::default()), UserConfig::default());
    }

    #[test]
    fn test_malformed_record_uses_default() {
        let default = UserConfig::default();
        assert_eq!(decode_user_config(KEY, Some("not json"), default), default);
        assert_eq!(decode_user_config(KEY, Some(r#"{"rate": 5}"#), default), default);
        assert_eq!(decode_user_config(KEY, Some(r#"{"rate": "fast", "capacity": 5}"#), default), default);
    }

    #[test]
    fn test_non_positive_record_uses_default() {
        let default = UserConfig::new(1.0, 2.0);
        assert_eq!(decode_user_config(KEY, Some(r#"{"rate": 0, "capacity": 5}"#), default), default);
        assert_eq!(decode_user_config(KEY, Some(r#"{"rate": 3, "capacity": -1}"#), default), default);
    }

    #[test]
    fn test_lookup_error_uses_default() {
        let default = UserConfig::new(4.0, 8.0);
        let dropped: redis::RedisResult<Option<String>> = Err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection dropped",
        )));
        assert_eq!(resolve_user_config(KEY, dropped, default), default);

        let found = Ok(Some(r#"{"rate": 1, "capacity": 2}"#.to_string()));
        assert_eq!(resolve_user_config(KEY, found, default), UserConfig::new(1.0, 2.0));
        assert_eq!(resolve_user_config(KEY, Ok(None), default), default);
    }

    #[tokio::test]
    #[ignore] // Requires a Redis instance
    async fn test_redis_config_lookup() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();

        let identity = format!("tollgate-test-{}", std::process::id());
        let _: () = redis::cmd("SET")
            .arg(config_key(&identity))
            .arg(r#"{"rate": 1, "capacity": 3}"#)
            .query_async(&mut conn)
            .await
            .unwrap();

        let store = RedisConfigStore::new(conn.clone());
        assert_eq!(store.get_user_config(&identity).await, UserConfig::new(1.0, 3.0));
        assert_eq!(store.get_user_config("tollgate-test-missing").await, UserConfig::default());

        let _: i64 = redis::cmd("DEL")
            .arg(config_key(&identity))
            .query_async(&mut conn)
            .await
            .unwrap();
    }
}
