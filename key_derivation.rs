//! Deterministic per-file key derivation.
//!
//! A file key is a pure function of the bucket's master secret and the file
//! id, so no per-file key ever needs to be stored: any client holding the
//! same master secret recomputes the identical key.
//!
//! ```text
//! HKDF-SHA256(salt = file_id, ikm = master secret, info = FILE_KEY_INFO)
//!   -> [ key: 32 bytes | iv: 16 bytes ]
//! ```

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use crate::error::BridgeCryptError;
use crate::key_manager::KeyMaterial;

/// Size of a file encryption key (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the initialization material bound into each chunk
pub const IV_SIZE: usize = 16;

/// Length of a file id in hex characters
pub const FILE_ID_LEN: usize = 24;

const FILE_KEY_INFO: &[u8] = b"bridgecrypt file key v1";

/// Per-file symmetric key plus its initialization material. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl FileKey {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Deterministic file id for `name` inside `bucket_id`
pub fn calculate_file_id(bucket_id: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket_id.as_bytes());
    hasher.update(name.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(FILE_ID_LEN);
    id
}

/// Derive the key for `file_id` from the bucket master secret.
pub fn derive_file_key(master: &KeyMaterial, file_id: &str) -> Result<FileKey, BridgeCryptError> {
    if master.as_bytes().is_empty() {
        return Err(BridgeCryptError::key("master secret is empty"));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(file_id.as_bytes()), master.as_bytes());
    let mut okm = [0u8; KEY_SIZE + IV_SIZE];
    hkdf.expand(FILE_KEY_INFO, &mut okm)
        .map_err(|e| BridgeCryptError::key(format!("HKDF expand failed: {e}")))?;

    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; IV_SIZE];
    key.copy_from_slice(&okm[..KEY_SIZE]);
    iv.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    Ok(FileKey { key, iv })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master(s: &str) -> KeyMaterial {
        KeyMaterial::from_bytes(s.as_bytes().to_vec())
    }

    #[test]
    fn test_derivation_deterministic() {
        let a = derive_file_key(&master("bucket-secret"), "file-1").unwrap();
        let b = derive_file_key(&master("bucket-secret"), "file-1").unwrap();
        assert_eq!(a.key(), b.key(), "file keys must be reproducible");
        assert_eq!(a.iv(), b.iv());
    }

    #[test]
    fn test_different_files_different_keys() {
        let m = master("bucket-secret");
        let a = derive_file_key(&m, "file-1").unwrap();
        let b = derive_file_key(&m, "file-2").unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_different_masters_different_keys() {
        let a = derive_file_key(&master("secret-a"), "file-1").unwrap();
        let b = derive_file_key(&master("secret-b"), "file-1").unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_empty_master_rejected() {
        let err = derive_file_key(&KeyMaterial::from_bytes(Vec::new()), "f").unwrap_err();
        assert!(matches!(err, BridgeCryptError::Key(_)));
    }

    #[test]
    fn test_file_id_shape() {
        let id = calculate_file_id("bucket", "photo.jpg");
        assert_eq!(id.len(), FILE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, calculate_file_id("bucket", "photo.jpg"));
        assert_ne!(id, calculate_file_id("other", "photo.jpg"));
    }
}
