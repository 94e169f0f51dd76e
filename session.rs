//! Explicit per-caller context shared by the orchestrators.
//!
//! A [`Session`] bundles the bridge handle, the shard fetcher, the chunk
//! store factory and the caller's bucket and key material. Sessions are
//! cheap to clone and independent of one another.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::bridge::{Bridge, BridgeClient, HttpShardFetcher, ShardFetcher};
use crate::chunk_store::ChunkStoreFactory;
use crate::config::{Config, StoreConfig};
use crate::error::{BridgeCryptError, BridgeError};
use crate::key_manager::KeyMaterial;
use crate::token::TokenManager;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHARD_CONCURRENCY: usize = 6;

#[derive(Debug, Clone)]
pub struct Session {
    bridge: Arc<dyn Bridge>,
    shards: Arc<dyn ShardFetcher>,
    stores: Arc<dyn ChunkStoreFactory>,
    bucket_id: Option<String>,
    key_material: Option<KeyMaterial>,
    timeout: Duration,
    shard_concurrency: usize,
    file_concurrency: usize,
}

impl Session {
    /// Session with an in-memory chunk store and default limits
    pub fn new(bridge: Arc<dyn Bridge>, shards: Arc<dyn ShardFetcher>) -> Self {
        Self {
            bridge,
            shards,
            stores: Arc::new(StoreConfig::Memory),
            bucket_id: None,
            key_material: None,
            timeout: DEFAULT_TIMEOUT,
            shard_concurrency: DEFAULT_SHARD_CONCURRENCY,
            file_concurrency: 1,
        }
    }

    /// Build the HTTP bridge client, shard fetcher and store factory a
    /// validated `Config` describes.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.timeout();
        let mut client = BridgeClient::new(&config.bridge_url()?, timeout)
            .context("building bridge client")?;
        if let (Some(user), Some(password)) = (&config.bridge_user, &config.bridge_password) {
            client = client.with_basic_auth(user.clone(), password);
        }
        debug!(
            bridge = %client.base_url(),
            authenticated = config.bridge_user.is_some(),
            "bridge client configured"
        );
        let fetcher = HttpShardFetcher::new(config.protocol.clone(), timeout)
            .context("building shard fetcher")?;

        let mut session = Self::new(Arc::new(client), Arc::new(fetcher))
            .with_store(Arc::new(config.store.clone()))
            .with_timeout(timeout)
            .with_shard_concurrency(config.concurrency)
            .with_file_concurrency(config.file_concurrency);
        if let Some(bucket_id) = &config.bucket_id {
            session = session.with_bucket(bucket_id.clone());
        }
        if let Some(keypass) = &config.keypass {
            session = session.with_key_material(KeyMaterial::from_bytes(keypass.as_bytes()));
        }
        Ok(session)
    }

    pub fn with_store(mut self, stores: Arc<dyn ChunkStoreFactory>) -> Self {
        self.stores = stores;
        self
    }

    pub fn with_bucket(mut self, bucket_id: impl Into<String>) -> Self {
        self.bucket_id = Some(bucket_id.into());
        self
    }

    /// Caller-held key for private buckets
    pub fn with_key_material(mut self, key: KeyMaterial) -> Self {
        self.key_material = Some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shard_concurrency(mut self, n: usize) -> Self {
        self.shard_concurrency = n.max(1);
        self
    }

    pub fn with_file_concurrency(mut self, n: usize) -> Self {
        self.file_concurrency = n.max(1);
        self
    }

    pub fn bridge(&self) -> &dyn Bridge {
        self.bridge.as_ref()
    }

    pub fn shards(&self) -> &dyn ShardFetcher {
        self.shards.as_ref()
    }

    pub fn stores(&self) -> &dyn ChunkStoreFactory {
        self.stores.as_ref()
    }

    pub fn bucket_id(&self) -> Option<&str> {
        self.bucket_id.as_deref()
    }

    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.key_material.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn shard_concurrency(&self) -> usize {
        self.shard_concurrency
    }

    pub fn file_concurrency(&self) -> usize {
        self.file_concurrency
    }

    pub fn tokens(&self) -> TokenManager<'_> {
        TokenManager::new(self)
    }

    /// Bridge information document (`GET /`)
    pub async fn info(&self) -> Result<serde_json::Value, BridgeCryptError> {
        self.call(self.bridge.info(), BridgeCryptError::rejected).await
    }

    /// The configured bucket, or a `Config` error for operations that need one
    pub(crate) fn require_bucket(&self) -> Result<&str, BridgeCryptError> {
        self.bucket_id()
            .ok_or_else(|| BridgeCryptError::config("no bucket id configured"))
    }

    /// Run one bridge round trip under the session deadline and classify
    /// its failure; `rejected` builds the kind for an error status.
    pub(crate) async fn call<T, F>(
        &self,
        fut: F,
        rejected: impl FnOnce(String) -> BridgeCryptError,
    ) -> Result<T, BridgeCryptError>
    where
        F: Future<Output = Result<T, BridgeError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.classify(self.timeout, rejected)),
            Err(_) => Err(BridgeCryptError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_carries_options() {
        let mut config = Config::new("https://bridge.example.com");
        config.bucket_id = Some("b1".into());
        config.keypass = Some("secret".into());
        config.concurrency = 3;
        config.timeout_secs = 5;

        let session = Session::from_config(&config).unwrap();
        assert_eq!(session.bucket_id(), Some("b1"));
        assert_eq!(session.key_material().unwrap().as_bytes(), b"secret");
        assert_eq!(session.shard_concurrency(), 3);
        assert_eq!(session.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config = Config::new("not a url");
        assert!(Session::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let config = Config::new("https://bridge.example.com");
        let session = Session::from_config(&config)
            .unwrap()
            .with_timeout(Duration::from_millis(10));

        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BridgeError>(())
        };
        let err = session.call(slow, BridgeCryptError::submit).await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Timeout(_)));
    }
}
