//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Prefix for environment overrides, e.g. `TOLLGATE__BACKEND__PASSWORD`.
const ENV_PREFIX: &str = "TOLLGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Bucket and configuration backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Default limits and bucket lifecycle
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Request metadata key carrying the caller identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            identity_header: default_identity_header(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50051))
}

fn default_identity_header() -> String {
    "user-id".to_string()
}

/// Which bucket store the service runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Shared Redis backend, valid across any number of instances
    #[default]
    Redis,
    /// In-process buckets for single-instance deployments and local runs
    Memory,
}

/// Backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Redis password, applied on top of the URL
    #[serde(default)]
    pub password: Option<String>,

    /// Upper bound for a single bucket operation, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            redis_url: default_redis_url(),
            password: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    100
}

/// Default limits and bucket lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Tokens per second for identities without their own record
    #[serde(default = "default_rate")]
    pub default_rate: f64,

    /// Burst size for identities without their own record
    #[serde(default = "default_capacity")]
    pub default_capacity: f64,

    /// Idle time after which a bucket is forgotten
    #[serde(default = "default_bucket_ttl")]
    pub bucket_ttl_secs: u64,

    /// How often the in-process store sweeps idle buckets
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Per-identity overrides file used with the in-process backend
    #[serde(default)]
    pub overrides_path: Option<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_rate: default_rate(),
            default_capacity: default_capacity(),
            bucket_ttl_secs: default_bucket_ttl(),
            purge_interval_secs: default_purge_interval(),
            overrides_path: None,
        }
    }
}

fn default_rate() -> f64 {
    10.0
}

fn default_capacity() -> f64 {
    50.0
}

fn default_bucket_ttl() -> u64 {
    60
}

fn default_purge_interval() -> u64 {
    30
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional file, then apply `TOLLGATE__*`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if !(limits.default_rate > 0.0 && limits.default_rate.is_finite()) {
            return Err(TollgateError::Config(format!(
                "default_rate must be positive, got {}",
                limits.default_rate
            )));
        }
        if !(limits.default_capacity > 0.0 && limits.default_capacity.is_finite()) {
            return Err(TollgateError::Config(format!(
                "default_capacity must be positive, got {}",
                limits.default_capacity
            )));
        }
        if limits.bucket_ttl_secs == 0 {
            return Err(TollgateError::Config("bucket_ttl_secs must be at least 1".into()));
        }
        if self.backend.timeout_ms == 0 {
            return Err(TollgateError::Config("backend timeout_ms must be at least 1".into()));
        }
        if self.server.identity_header.is_empty() {
            return Err(TollgateError::Config("identity_header must not be empty".into()));
        }
        Ok(())
    }
}
