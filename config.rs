//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating client
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `BRIDGECRYPT_CONFIG`: Override config file path
//! - `BRIDGECRYPT_BRIDGE_URL`: Override bridge base URL
//! - `BRIDGECRYPT_BUCKET_ID`: Override default bucket
//! - `BRIDGECRYPT_KEYPASS`: Key material for private buckets
//! - `BRIDGECRYPT_KEY_PATH`: Override client key pair path
//! - `BRIDGECRYPT_BRIDGE_USER` / `BRIDGECRYPT_BRIDGE_PASSWORD`: Bridge credentials

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Environment variable names for configuration overrides
pub const ENV_CONFIG_PATH: &str = "BRIDGECRYPT_CONFIG";
pub const ENV_BRIDGE_URL: &str = "BRIDGECRYPT_BRIDGE_URL";
pub const ENV_BUCKET_ID: &str = "BRIDGECRYPT_BUCKET_ID";
pub const ENV_KEYPASS: &str = "BRIDGECRYPT_KEYPASS";
pub const ENV_KEY_PATH: &str = "BRIDGECRYPT_KEY_PATH";
pub const ENV_BRIDGE_USER: &str = "BRIDGECRYPT_BRIDGE_USER";
pub const ENV_BRIDGE_PASSWORD: &str = "BRIDGECRYPT_BRIDGE_PASSWORD";

pub const DEFAULT_BRIDGE: &str = "https://api.storj.io";
pub const DEFAULT_PROTOCOL: &str = "http";

/// Which chunk store backs each transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Filesystem {
        /// Directory for temporary files; the system temp dir when unset
        #[serde(default)]
        dir: Option<PathBuf>,
    },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: String,
    /// Scheme used to fetch shards from farmers
    pub protocol: String,
    pub bucket_id: Option<String>,
    pub store: StoreConfig,
    pub keypass: Option<String>,
    pub key_path: String,
    pub bridge_user: Option<String>,
    pub bridge_password: Option<String>,
    pub timeout_secs: u64,
    /// Shards fetched concurrently per download
    pub concurrency: usize,
    /// Files uploaded concurrently by `upload_many`
    pub file_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: DEFAULT_BRIDGE.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            bucket_id: None,
            store: StoreConfig::default(),
            keypass: None,
            key_path: "./bridgecrypt.key".to_string(),
            bridge_user: None,
            bridge_password: None,
            timeout_secs: 30,
            concurrency: 6,
            file_concurrency: 1,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bridge", &self.bridge)
            .field("protocol", &self.protocol)
            .field("bucket_id", &self.bucket_id)
            .field("store", &self.store)
            .field("keypass", &self.keypass.as_ref().map(|_| "[REDACTED]"))
            .field("key_path", &self.key_path)
            .field("bridge_user", &self.bridge_user)
            .field(
                "bridge_password",
                &self.bridge_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("file_concurrency", &self.file_concurrency)
            .finish()
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config = serde_json::from_str(&s)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s)?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bridge) = env::var(ENV_BRIDGE_URL) {
            debug!(bridge = %bridge, "overriding bridge from environment");
            self.bridge = bridge;
        }

        if let Ok(bucket_id) = env::var(ENV_BUCKET_ID) {
            debug!(bucket_id = %bucket_id, "overriding bucket_id from environment");
            self.bucket_id = Some(bucket_id);
        }

        if let Ok(keypass) = env::var(ENV_KEYPASS) {
            debug!("keypass supplied by environment");
            self.keypass = Some(keypass);
        }

        if let Ok(key_path) = env::var(ENV_KEY_PATH) {
            debug!(key_path = %key_path, "overriding key_path from environment");
            self.key_path = key_path;
        }

        if let Ok(user) = env::var(ENV_BRIDGE_USER) {
            self.bridge_user = Some(user);
        }

        if let Ok(password) = env::var(ENV_BRIDGE_PASSWORD) {
            self.bridge_password = Some(password);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let url = self.bridge_url()?;
        if url.scheme() == "http" {
            warn!(
                bridge = %self.bridge,
                "bridge uses plaintext HTTP - credentials and tokens are transmitted unencrypted"
            );
        }

        if self.protocol.trim().is_empty() {
            anyhow::bail!("protocol cannot be empty");
        }

        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be greater than zero");
        }

        if self.concurrency == 0 || self.file_concurrency == 0 {
            anyhow::bail!("concurrency and file_concurrency must be greater than zero");
        }

        if matches!(self.bucket_id.as_deref(), Some(id) if id.trim().is_empty()) {
            anyhow::bail!("bucket_id cannot be empty when set");
        }

        if self.key_path.trim().is_empty() {
            anyhow::bail!("key_path cannot be empty");
        }

        Ok(())
    }

    pub fn bridge_url(&self) -> Result<Url> {
        Url::parse(&self.bridge).with_context(|| format!("parsing bridge url {}", self.bridge))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a new config pointing at `bridge` with all other values defaulted
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            ..Self::default()
        }
    }
}
