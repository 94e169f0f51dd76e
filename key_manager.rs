//! Key material and client key pair provisioning.
//!
//! This module provides:
//!
//! - [`KeyMaterial`]: the opaque master secret a transfer derives file keys from
//! - [`KeyPair`]: an Ed25519 key pair used to register buckets and, when a
//!   bucket goes public, to publish its shared encryption key
//! - [`KeyManager`]: explicit first-use provisioning of the client key pair,
//!   persisted to disk
//!
//! ## Security Features
//!
//! - Secrets are zeroized on drop
//! - Unix file permissions set to 0600 (owner read/write only)
//! - `Debug` output never contains key bytes

use anyhow::{bail, Context, Result};
use chacha20poly1305::aead::OsRng;
use ed25519_dalek::SigningKey;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::BridgeCryptError;

/// Size of an Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Master secret for one bucket: the bridge-published key of a public bucket
/// or the caller-held keypass of a private one.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    /// Wrap an encryption key string exactly as the bridge hands it out
    pub fn from_bridge_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        Some(Self::from_bytes(key.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Ed25519 key pair. The private half doubles as a public bucket's shared
/// encryption key, so it is exposed as hex.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn from_private_hex(hex_key: &str) -> Result<Self, BridgeCryptError> {
        let mut buf = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        hex::decode_to_slice(hex_key.trim(), &mut buf[..])
            .map_err(|e| BridgeCryptError::key(format!("invalid private key hex: {e}")))?;
        Ok(Self::from_bytes(&buf))
    }

    pub fn public_key(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    pub fn private_key(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    /// Key material other clients use to encrypt and decrypt files in a
    /// bucket whose encryption key is this pair's private key
    pub fn key_material(&self) -> KeyMaterial {
        KeyMaterial::from_bytes(self.private_key().as_bytes())
    }

    fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        Zeroizing::new(self.signing.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Loads the client key pair, generating and persisting it on first use.
/// In production: prefer a hardware key store or OS keyring.
pub struct KeyManager;

impl KeyManager {
    pub async fn load_or_generate(path: impl AsRef<Path>) -> Result<KeyPair> {
        let path = path.as_ref();

        if fs::try_exists(path)
            .await
            .with_context(|| format!("checking existence of {}", path.display()))?
        {
            return Self::load(path).await;
        }

        info!(path = %path.display(), "generating new client key pair");
        let pair = KeyPair::generate();
        let bytes = pair.to_bytes();

        #[cfg(unix)]
        {
            let path_buf = path.to_path_buf();
            let key_copy = bytes.clone();
            tokio::task::spawn_blocking(move || {
                use std::fs::OpenOptions;
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;

                let mut f = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(&path_buf)?;
                f.write_all(&key_copy[..])?;
                Ok::<(), anyhow::Error>(())
            })
            .await??;
        }
        #[cfg(not(unix))]
        {
            fs::write(path, &bytes[..]).await?;
        }

        Ok(pair)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<KeyPair> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading client key pair");
        let data = Zeroizing::new(
            fs::read(path)
                .await
                .with_context(|| format!("reading key from {}", path.display()))?,
        );
        if data.len() != PRIVATE_KEY_SIZE {
            warn!(path = %path.display(), found_bytes = data.len(), "invalid key size");
            bail!(
                "expected {}-byte key at {} but found {} bytes",
                PRIVATE_KEY_SIZE,
                path.display(),
                data.len()
            );
        }
        let mut arr = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        arr.copy_from_slice(&data);
        Ok(KeyPair::from_bytes(&arr))
    }
}
