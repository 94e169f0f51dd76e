use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation a token authorizes, doubling as a public bucket permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Push,
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("PUSH"),
            Direction::Pull => f.write_str("PULL"),
        }
    }
}

/// Body of `POST /buckets/{id}/tokens`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub operation: Option<Direction>,
    /// Empty or absent for private buckets
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .field("operation", &self.operation)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id", &self.id)
            .field("mimetype", &self.mimetype)
            .finish()
    }
}

/// A stored file as the bridge describes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub size: u64,
}

/// Ciphertext submitted with a PUSH token
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub mimetype: String,
    pub ciphertext: Bytes,
}

/// Node holding a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub address: String,
    pub port: u16,
    #[serde(default, rename = "nodeID")]
    pub node_id: Option<String>,
}

/// Location of one shard; `index` is the shard's position in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    pub index: u32,
    pub hash: String,
    pub size: u64,
    pub token: String,
    pub farmer: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub pubkeys: Vec<String>,
    #[serde(default)]
    pub public_permissions: Vec<Direction>,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Bucket {
    /// The shared encryption key, if the bucket has been made public
    pub fn public_key(&self) -> Option<&str> {
        self.encryption_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn allows(&self, direction: Direction) -> bool {
        self.public_permissions.contains(&direction)
    }
}

/// Bucket metadata joined with its file listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketDetails {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub id: String,
    pub name: String,
}

impl From<Bucket> for BucketSummary {
    fn from(bucket: Bucket) -> Self {
        Self {
            id: bucket.id,
            name: bucket.name,
        }
    }
}

/// Body of `POST /buckets`
#[derive(Debug, Clone, Serialize)]
pub struct NewBucket {
    pub name: String,
    pub pubkeys: Vec<String>,
}

/// Body of `PATCH /buckets/{id}`
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketUpdate {
    pub public_permissions: Vec<Direction>,
    pub encryption_key: String,
}

impl fmt::Debug for BucketUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketUpdate")
            .field("public_permissions", &self.public_permissions)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

/// Result of publishing a bucket: `[id, name, pull, push, key]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicBucket {
    pub id: String,
    pub name: String,
    pub pull: bool,
    pub push: bool,
    pub key: Option<String>,
}

impl From<Bucket> for PublicBucket {
    fn from(bucket: Bucket) -> Self {
        Self {
            pull: bucket.allows(Direction::Pull),
            push: bucket.allows(Direction::Push),
            key: bucket.public_key().map(str::to_string),
            id: bucket.id,
            name: bucket.name,
        }
    }
}
