//! Streaming encryption and decryption pipeline.
//!
//! This module provides [`CipherPipeline`], which wires a source byte stream
//! through a file key in either direction and into a sink, one chunk at a
//! time, so a file never has to be resident in memory as a whole.
//!
//! ## Ciphertext Format
//!
//! ```text
//! [version:1][chunk0][chunk1]...
//!
//! Each chunk:
//! [nonce:24][length:4][encrypted_data + tag:16]
//! ```
//!
//! The high bit of `length` marks the final chunk. Every chunk is
//! authenticated with AAD = `iv || chunk_index (u64 BE) || final`, which
//! rejects a wrong key, tampered or reordered chunks, and truncation.
//!
//! ## Chunk Size
//!
//! Files are processed in 64KB chunks, balancing memory usage against
//! per-chunk cryptographic overhead.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::BridgeCryptError;
use crate::key_derivation::{FileKey, IV_SIZE};

/// Plaintext bytes per chunk (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Ciphertext format version
pub const VERSION: u8 = 1;

const HEADER_SIZE: usize = 1;
const NONCE_SIZE: usize = 24;
const LEN_SIZE: usize = 4;
const TAG_SIZE: usize = 16;
const FINAL_CHUNK: u32 = 0x8000_0000;

/// Bytes added to every chunk (nonce, length prefix, tag)
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + LEN_SIZE + TAG_SIZE;

/// Exact ciphertext length for `plain_len` bytes of plaintext.
/// An empty file still carries one (empty) final chunk.
pub fn ciphertext_len(plain_len: u64) -> u64 {
    let chunks = plain_len.div_ceil(CHUNK_SIZE as u64).max(1);
    HEADER_SIZE as u64 + plain_len + chunks * CHUNK_OVERHEAD as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    Encrypt,
    Decrypt,
}

/// Chunked AEAD transform bound to one file key
pub struct CipherPipeline {
    cipher: XChaCha20Poly1305,
    iv: [u8; IV_SIZE],
}

impl CipherPipeline {
    pub fn new(file_key: &FileKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(file_key.key().into()),
            iv: *file_key.iv(),
        }
    }

    /// Pump `reader` through the transform into `writer`.
    /// Returns the number of plaintext bytes processed.
    pub async fn run<R, W>(
        &self,
        direction: CipherDirection,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, BridgeCryptError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match direction {
            CipherDirection::Encrypt => self.encrypt_stream(reader, writer).await,
            CipherDirection::Decrypt => self.decrypt_stream(reader, writer).await,
        }
    }

    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, BridgeCryptError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_u8(VERSION).await.map_err(sink_error)?;

        let mut current = vec![0u8; CHUNK_SIZE];
        let mut next = vec![0u8; CHUNK_SIZE];
        let mut len = read_chunk(reader, &mut current).await?;
        let mut index = 0u64;
        let mut total_bytes = 0u64;

        loop {
            // A full chunk is only final if the source has nothing left
            let (is_final, next_len) = if len < CHUNK_SIZE {
                (true, 0)
            } else {
                let n = read_chunk(reader, &mut next).await?;
                (n == 0, n)
            };

            self.seal_chunk(writer, index, &current[..len], is_final)
                .await?;
            total_bytes += len as u64;

            if is_final {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            len = next_len;
            index += 1;
        }

        writer.flush().await.map_err(sink_error)?;
        debug!(bytes = total_bytes, chunks = index + 1, "stream encrypted");
        Ok(total_bytes)
    }

    pub async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, BridgeCryptError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let version = reader.read_u8().await.map_err(read_error)?;
        if version != VERSION {
            return Err(BridgeCryptError::format(format!(
                "unsupported ciphertext version: {}",
                version
            )));
        }

        let mut total_bytes = 0u64;
        let mut index = 0u64;
        let mut nonce_buf = [0u8; NONCE_SIZE];

        loop {
            reader.read_exact(&mut nonce_buf).await.map_err(read_error)?;
            let len_field = reader.read_u32().await.map_err(read_error)?;
            let is_final = len_field & FINAL_CHUNK != 0;
            let chunk_len = (len_field & !FINAL_CHUNK) as usize;
            if !(TAG_SIZE..=CHUNK_SIZE + TAG_SIZE).contains(&chunk_len) {
                return Err(BridgeCryptError::format(format!(
                    "chunk {} has invalid length {}",
                    index, chunk_len
                )));
            }

            let mut ciphertext = vec![0u8; chunk_len];
            reader
                .read_exact(&mut ciphertext)
                .await
                .map_err(read_error)?;

            #[allow(deprecated)]
            let nonce = XNonce::from_slice(&nonce_buf);
            let aad = self.aad(index, is_final);
            let plaintext = self
                .cipher
                .decrypt(
                    nonce,
                    Payload {
                        msg: &ciphertext,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    BridgeCryptError::decryption(format!(
                        "chunk {} failed authentication: wrong key or corrupted data",
                        index
                    ))
                })?;

            writer.write_all(&plaintext).await.map_err(sink_error)?;
            total_bytes += plaintext.len() as u64;

            if is_final {
                let mut extra = [0u8; 1];
                if reader.read(&mut extra).await.map_err(source_error)? != 0 {
                    return Err(BridgeCryptError::format(
                        "trailing data after final chunk",
                    ));
                }
                break;
            }
            index += 1;
        }

        writer.flush().await.map_err(sink_error)?;
        debug!(bytes = total_bytes, chunks = index + 1, "stream decrypted");
        Ok(total_bytes)
    }

    async fn seal_chunk<W>(
        &self,
        writer: &mut W,
        index: u64,
        plaintext: &[u8],
        is_final: bool,
    ) -> Result<(), BridgeCryptError>
    where
        W: AsyncWrite + Unpin,
    {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let aad = self.aad(index, is_final);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| BridgeCryptError::encryption(format!("chunk {}: {}", index, e)))?;

        let mut len_field = ciphertext.len() as u32;
        if is_final {
            len_field |= FINAL_CHUNK;
        }

        writer.write_all(&nonce).await.map_err(sink_error)?;
        writer.write_u32(len_field).await.map_err(sink_error)?;
        writer.write_all(&ciphertext).await.map_err(sink_error)?;
        Ok(())
    }

    fn aad(&self, index: u64, is_final: bool) -> [u8; IV_SIZE + 9] {
        let mut aad = [0u8; IV_SIZE + 9];
        aad[..IV_SIZE].copy_from_slice(&self.iv);
        aad[IV_SIZE..IV_SIZE + 8].copy_from_slice(&index.to_be_bytes());
        aad[IV_SIZE + 8] = is_final as u8;
        aad
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, BridgeCryptError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await.map_err(source_error)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn source_error(e: io::Error) -> BridgeCryptError {
    BridgeCryptError::storage(format!("reading source stream: {}", e))
}

fn sink_error(e: io::Error) -> BridgeCryptError {
    BridgeCryptError::storage(format!("writing sink: {}", e))
}

fn read_error(e: io::Error) -> BridgeCryptError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BridgeCryptError::decryption("ciphertext truncated before final chunk")
    } else {
        source_error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_derivation::derive_file_key;
    use crate::key_manager::KeyMaterial;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn pipeline(secret: &str, file_id: &str) -> CipherPipeline {
        let master = KeyMaterial::from_bytes(secret.as_bytes().to_vec());
        CipherPipeline::new(&derive_file_key(&master, file_id).expect("derive"))
    }

    async fn encrypt(p: &CipherPipeline, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        p.encrypt_stream(&mut Cursor::new(data.to_vec()), &mut out)
            .await
            .expect("encryption failed");
        out
    }

    async fn decrypt(p: &CipherPipeline, data: Vec<u8>) -> Result<Vec<u8>, BridgeCryptError> {
        let mut out = Vec::new();
        p.decrypt_stream(&mut Cursor::new(data), &mut out).await?;
        Ok(out)
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away")))
        }
    }

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stream_round_trip_small() {
        let p = pipeline("secret", "file");
        let plaintext = b"abcdefghij";
        let encrypted = encrypt(&p, plaintext).await;

        assert_eq!(encrypted.len() as u64, ciphertext_len(plaintext.len() as u64));
        assert_eq!(decrypt(&p, encrypted).await.unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_stream_round_trip_large() {
        let p = pipeline("secret", "file");
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 3 + 1000).map(|i| (i % 251) as u8).collect();
        let encrypted = encrypt(&p, &plaintext).await;

        assert_eq!(encrypted.len() as u64, ciphertext_len(plaintext.len() as u64));
        assert_eq!(decrypt(&p, encrypted).await.unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_exact_chunk_multiple_and_empty() {
        let p = pipeline("secret", "file");
        for size in [0, CHUNK_SIZE, CHUNK_SIZE * 2] {
            let plaintext = vec![7u8; size];
            let encrypted = encrypt(&p, &plaintext).await;
            assert_eq!(encrypted.len() as u64, ciphertext_len(size as u64), "size {size}");
            assert_eq!(decrypt(&p, encrypted).await.unwrap(), plaintext);
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_direction() {
        let p = pipeline("secret", "file");
        let mut encrypted = Vec::new();
        p.run(
            CipherDirection::Encrypt,
            &mut Cursor::new(b"direction".to_vec()),
            &mut encrypted,
        )
        .await
        .unwrap();

        let mut decrypted = Vec::new();
        let n = p
            .run(CipherDirection::Decrypt, &mut Cursor::new(encrypted), &mut decrypted)
            .await
            .unwrap();
        assert_eq!(n, 9);
        assert_eq!(decrypted, b"direction");
    }

    #[tokio::test]
    async fn test_wrong_key_is_detected() {
        let encrypted = encrypt(&pipeline("secret", "file"), b"top secret").await;
        let err = decrypt(&pipeline("secret", "other-file"), encrypted)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeCryptError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_truncation_is_detected() {
        let p = pipeline("secret", "file");
        let plaintext = vec![1u8; CHUNK_SIZE * 2 + 10];
        let encrypted = encrypt(&p, &plaintext).await;

        // Drop the whole final chunk, leaving two well-formed chunks
        let last_chunk = CHUNK_OVERHEAD + 10;
        let truncated = encrypted[..encrypted.len() - last_chunk].to_vec();
        let err = decrypt(&p, truncated).await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_reordered_chunks_are_detected() {
        let p = pipeline("secret", "file");
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2 + 5).map(|i| i as u8).collect();
        let encrypted = encrypt(&p, &plaintext).await;

        let full = CHUNK_OVERHEAD + CHUNK_SIZE;
        let mut swapped = vec![encrypted[0]];
        swapped.extend_from_slice(&encrypted[1 + full..1 + 2 * full]);
        swapped.extend_from_slice(&encrypted[1..1 + full]);
        swapped.extend_from_slice(&encrypted[1 + 2 * full..]);

        let err = decrypt(&p, swapped).await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_trailing_data_rejected() {
        let p = pipeline("secret", "file");
        let mut encrypted = encrypt(&p, b"payload").await;
        encrypted.push(0);
        let err = decrypt(&p, encrypted).await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Format(_)));
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let p = pipeline("secret", "file");
        let mut encrypted = encrypt(&p, b"payload").await;
        encrypted[0] = 9;
        let err = decrypt(&p, encrypted).await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Format(_)));
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let p = pipeline("secret", "file");
        let mut out = Vec::new();
        let err = p
            .encrypt_stream(&mut FailingReader, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeCryptError::Storage(_)));
    }

    #[tokio::test]
    async fn test_sink_error_propagates() {
        let p = pipeline("secret", "file");
        let err = p
            .encrypt_stream(&mut Cursor::new(b"data".to_vec()), &mut FailingWriter)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeCryptError::Storage(_)));
    }
}
