//! File-backed limit configuration.
//!
//! Used with the in-process store, where no shared backend holds per-identity
//! records. The file format is:
//!
//! ```yaml
//! default:
//!   rate: 10
//!   capacity: 50
//! users:
//!   alice:
//!     rate: 1
//!     capacity: 5
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::config_store::{ConfigSource, UserConfig};
use crate::error::{Result, TollgateError};

/// Static per-identity limits with a default for everyone else.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    /// Limits for identities without an entry
    pub default: UserConfig,
    /// Per-identity overrides
    pub users: HashMap<String, UserConfig>,
}

/// On-disk shape of an overrides file.
#[derive(Debug, Deserialize)]
struct OverridesFile {
    #[serde(default)]
    default: Option<UserConfig>,
    #[serde(default)]
    users: HashMap<String, UserConfig>,
}

impl StaticConfigStore {
    /// A store that gives every identity the same limits.
    pub fn new(default: UserConfig) -> Self {
        Self {
            default,
            users: HashMap::new(),
        }
    }

    /// Load overrides from a YAML file.
    ///
    /// `fallback` applies to everyone else unless the file has its own
    /// `default` block.
    pub fn from_file<P: AsRef<Path>>(path: P, fallback: UserConfig) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limit overrides");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents, fallback)
    }

    /// Parse overrides from a YAML string.
    ///
    /// Every entry must have positive limits; a bad entry rejects the whole file.
    pub fn from_yaml(yaml: &str, fallback: UserConfig) -> Result<Self> {
        let file: OverridesFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse limit overrides: {}", e)))?;

        let store = Self {
            default: file.default.unwrap_or(fallback),
            users: file.users,
        };

        if !store.default.is_valid() {
            return Err(TollgateError::Config("default limits must be positive".into()));
        }
        if let Some((identity, _)) = store.users.iter().find(|(_, config)| !config.is_valid()) {
            return Err(TollgateError::Config(format!(
                "limits for identity {:?} must be positive",
                identity
            )));
        }

        Ok(store)
    }

    /// Add or replace the limits for one identity.
    pub fn set_user(&mut self, identity: impl Into<String>, config: UserConfig) {
        self.users.insert(identity.into(), config);
    }

    pub fn lookup(&self, identity: &str) -> UserConfig {
        self.users.get(identity).copied().unwrap_or(self.default)
    }
}

#[async_trait]
impl ConfigSource for StaticConfigStore {
    async fn get_user_config(&self, identity: &str) -> UserConfig {
        self.lookup(identity)
    }

    fn default_config(&self) -> UserConfig {
        self.default
    }
}
