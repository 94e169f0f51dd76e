//! Bridge and shard-fetch collaborators.
//!
//! The orchestrators only see the [`Bridge`] and [`ShardFetcher`] traits;
//! [`BridgeClient`] and [`HttpShardFetcher`] are the HTTP implementations.
//! Both are safe to share across concurrent transfers.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::BridgeError;
use crate::metadata::{
    Bucket, BucketUpdate, Direction, FileDescriptor, FileUpload, NewBucket, Pointer,
    TokenResponse,
};

const TOKEN_HEADER: &str = "x-token";

#[async_trait]
pub trait Bridge: Send + Sync + fmt::Debug {
    /// `GET /`
    async fn info(&self) -> Result<serde_json::Value, BridgeError>;

    /// `POST /buckets/{id}/tokens`
    async fn create_token(
        &self,
        bucket_id: &str,
        operation: Direction,
    ) -> Result<TokenResponse, BridgeError>;

    /// `POST /buckets/{id}/files`
    async fn store_file(
        &self,
        bucket_id: &str,
        token: &str,
        upload: FileUpload,
    ) -> Result<FileDescriptor, BridgeError>;

    /// `GET /buckets/{id}/files/{file_id}/pointers`, ordered by offset
    async fn file_pointers(
        &self,
        bucket_id: &str,
        token: &str,
        file_id: &str,
    ) -> Result<Vec<Pointer>, BridgeError>;

    async fn create_bucket(&self, bucket: NewBucket) -> Result<Bucket, BridgeError>;

    async fn get_bucket(&self, bucket_id: &str) -> Result<Bucket, BridgeError>;

    async fn list_buckets(&self) -> Result<Vec<Bucket>, BridgeError>;

    async fn list_files(&self, bucket_id: &str) -> Result<Vec<FileDescriptor>, BridgeError>;

    async fn delete_bucket(&self, bucket_id: &str) -> Result<(), BridgeError>;

    async fn update_bucket(
        &self,
        bucket_id: &str,
        update: BucketUpdate,
    ) -> Result<Bucket, BridgeError>;
}

/// Fetches the bytes behind one shard pointer
#[async_trait]
pub trait ShardFetcher: Send + Sync + fmt::Debug {
    async fn fetch(&self, pointer: &Pointer) -> Result<Bytes, BridgeError>;
}

#[derive(Clone)]
pub struct BridgeClient {
    remote: Url,
    client: Client,
    auth: Option<(String, String)>,
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient")
            .field("remote", &self.remote.as_str())
            .field("user", &self.auth.as_ref().map(|(user, _)| user))
            .finish()
    }
}

impl BridgeClient {
    pub fn new(remote: &Url, timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut remote = remote.clone();
        if !remote.path().ends_with('/') {
            let path = format!("{}/", remote.path());
            remote.set_path(&path);
        }

        Ok(Self {
            remote,
            client,
            auth: None,
        })
    }

    /// Authenticate with basic auth; the bridge expects the SHA-256 hex
    /// digest of the password rather than the password itself.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: &str) -> Self {
        let hashed = hex::encode(Sha256::digest(password.as_bytes()));
        self.auth = Some((user.into(), hashed));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    fn url(&self, path: &str) -> Result<Url, BridgeError> {
        Ok(self.remote.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BridgeError> {
        let url = self.url(path)?;
        debug!(%method, url = %url, "bridge request");
        let builder = self.client.request(method, url);
        Ok(match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, BridgeError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await?;
            serde_json::from_slice(&body).map_err(|e| BridgeError::Decode(e.to_string()))
        } else {
            Err(BridgeError::HttpStatus(status, response.text().await?))
        }
    }

    async fn send_empty(builder: RequestBuilder) -> Result<(), BridgeError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::HttpStatus(status, response.text().await?))
        }
    }
}

#[async_trait]
impl Bridge for BridgeClient {
    async fn info(&self) -> Result<serde_json::Value, BridgeError> {
        Self::send(self.request(Method::GET, "/")?).await
    }

    async fn create_token(
        &self,
        bucket_id: &str,
        operation: Direction,
    ) -> Result<TokenResponse, BridgeError> {
        let body = serde_json::json!({ "operation": operation });
        let builder = self
            .request(Method::POST, &format!("buckets/{}/tokens", bucket_id))?
            .json(&body);
        Self::send(builder).await
    }

    async fn store_file(
        &self,
        bucket_id: &str,
        token: &str,
        upload: FileUpload,
    ) -> Result<FileDescriptor, BridgeError> {
        let builder = self
            .request(Method::POST, &format!("buckets/{}/files", bucket_id))?
            .header(TOKEN_HEADER, token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .query(&[
                ("filename", upload.filename.as_str()),
                ("mimetype", upload.mimetype.as_str()),
            ])
            .body(upload.ciphertext);
        Self::send(builder).await
    }

    async fn file_pointers(
        &self,
        bucket_id: &str,
        token: &str,
        file_id: &str,
    ) -> Result<Vec<Pointer>, BridgeError> {
        let builder = self
            .request(
                Method::GET,
                &format!("buckets/{}/files/{}/pointers", bucket_id, file_id),
            )?
            .header(TOKEN_HEADER, token);
        Self::send(builder).await
    }

    async fn create_bucket(&self, bucket: NewBucket) -> Result<Bucket, BridgeError> {
        Self::send(self.request(Method::POST, "buckets")?.json(&bucket)).await
    }

    async fn get_bucket(&self, bucket_id: &str) -> Result<Bucket, BridgeError> {
        Self::send(self.request(Method::GET, &format!("buckets/{}", bucket_id))?).await
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, BridgeError> {
        Self::send(self.request(Method::GET, "buckets")?).await
    }

    async fn list_files(&self, bucket_id: &str) -> Result<Vec<FileDescriptor>, BridgeError> {
        Self::send(self.request(Method::GET, &format!("buckets/{}/files", bucket_id))?).await
    }

    async fn delete_bucket(&self, bucket_id: &str) -> Result<(), BridgeError> {
        Self::send_empty(self.request(Method::DELETE, &format!("buckets/{}", bucket_id))?).await
    }

    async fn update_bucket(
        &self,
        bucket_id: &str,
        update: BucketUpdate,
    ) -> Result<Bucket, BridgeError> {
        let builder = self
            .request(Method::PATCH, &format!("buckets/{}", bucket_id))?
            .json(&update);
        Self::send(builder).await
    }
}

/// Fetches shards straight from the farmers named in each pointer
#[derive(Debug, Clone)]
pub struct HttpShardFetcher {
    client: Client,
    protocol: String,
}

impl HttpShardFetcher {
    pub fn new(protocol: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            protocol: protocol.into(),
        })
    }

    fn shard_url(&self, pointer: &Pointer) -> Result<Url, BridgeError> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}/shards/{}",
            self.protocol, pointer.farmer.address, pointer.farmer.port, pointer.hash
        ))?;
        url.query_pairs_mut().append_pair("token", &pointer.token);
        Ok(url)
    }
}

#[async_trait]
impl ShardFetcher for HttpShardFetcher {
    async fn fetch(&self, pointer: &Pointer) -> Result<Bytes, BridgeError> {
        let url = self.shard_url(pointer)?;
        debug!(index = pointer.index, hash = %pointer.hash, "fetching shard");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::HttpStatus(status, response.text().await?));
        }
        let data = response.bytes().await?;
        if data.len() as u64 != pointer.size {
            return Err(BridgeError::Decode(format!(
                "shard {} returned {} bytes, expected {}",
                pointer.index,
                data.len(),
                pointer.size
            )));
        }
        Ok(data)
    }
}
