//! Staging buffers between the cipher pipeline and the network leg.
//!
//! A [`ChunkStore`] is opened for exactly one transfer, sized to the bytes it
//! is expected to hold, filled sequentially through a [`StoreWriter`] and read
//! back by range. Dropping a store releases its memory or temporary file, so
//! a failed transfer never leaves staging data behind.

use async_trait::async_trait;
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::BridgeCryptError;

/// Upper bound on memory reserved up front for an in-memory store
const PREALLOC_LIMIT: u64 = 64 * 1024 * 1024;

#[async_trait]
pub trait ChunkStore: Send + Sync + fmt::Debug {
    /// Bytes this store was opened for; writes past it fail
    fn capacity(&self) -> u64;

    /// Bytes written so far
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequential writer appending at the current offset
    fn writer(&mut self) -> StoreWriter<'_>;

    async fn get(&self, offset: u64, len: u64) -> Result<Vec<u8>, BridgeCryptError>;

    /// Stream over everything written so far
    async fn reader(&self) -> Result<Box<dyn AsyncRead + Send + Unpin + '_>, BridgeCryptError>;

    async fn read_all(&self) -> Result<Vec<u8>, BridgeCryptError> {
        self.get(0, self.len()).await
    }

    /// Release backing memory or storage
    fn destroy(self: Box<Self>) -> Result<(), BridgeCryptError>;
}

/// Constructs a store per transfer; swapping the factory swaps the backing
/// medium without touching orchestrator logic.
pub trait ChunkStoreFactory: Send + Sync + fmt::Debug {
    fn open(&self, expected_len: u64) -> Result<Box<dyn ChunkStore>, BridgeCryptError>;
}

impl ChunkStoreFactory for StoreConfig {
    fn open(&self, expected_len: u64) -> Result<Box<dyn ChunkStore>, BridgeCryptError> {
        match self {
            StoreConfig::Memory => Ok(Box::new(MemoryChunkStore::new(expected_len))),
            StoreConfig::Filesystem { dir } => {
                Ok(Box::new(FsChunkStore::open(dir.as_deref(), expected_len)?))
            }
        }
    }
}

/// Offset-tracking writer that refuses to grow a store past its capacity
pub struct StoreWriter<'a> {
    inner: &'a mut (dyn AsyncWrite + Send + Unpin),
    written: &'a mut u64,
    capacity: u64,
}

impl<'a> StoreWriter<'a> {
    fn new(
        inner: &'a mut (dyn AsyncWrite + Send + Unpin),
        written: &'a mut u64,
        capacity: u64,
    ) -> Self {
        Self {
            inner,
            written,
            capacity,
        }
    }
}

impl AsyncWrite for StoreWriter<'_> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let remaining = this.capacity.saturating_sub(*this.written);
        if buf.len() as u64 > remaining {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "chunk store overflow: write of {} bytes at offset {} exceeds expected size {}",
                    buf.len(),
                    *this.written,
                    this.capacity
                ),
            )));
        }
        match Pin::new(&mut *this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                *this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

fn check_range(offset: u64, len: u64, written: u64) -> Result<(), BridgeCryptError> {
    match offset.checked_add(len) {
        Some(end) if end <= written => Ok(()),
        _ => Err(BridgeCryptError::storage(format!(
            "range {}+{} outside stored {} bytes",
            offset, len, written
        ))),
    }
}

/// Heap-backed store, usable in every environment
pub struct MemoryChunkStore {
    buf: Vec<u8>,
    written: u64,
    capacity: u64,
}

impl MemoryChunkStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(PREALLOC_LIMIT) as usize),
            written: 0,
            capacity,
        }
    }
}

impl fmt::Debug for MemoryChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChunkStore")
            .field("written", &self.written)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn len(&self) -> u64 {
        self.written
    }

    fn writer(&mut self) -> StoreWriter<'_> {
        StoreWriter::new(&mut self.buf, &mut self.written, self.capacity)
    }

    async fn get(&self, offset: u64, len: u64) -> Result<Vec<u8>, BridgeCryptError> {
        check_range(offset, len, self.written)?;
        Ok(self.buf[offset as usize..(offset + len) as usize].to_vec())
    }

    async fn reader(&self) -> Result<Box<dyn AsyncRead + Send + Unpin + '_>, BridgeCryptError> {
        Ok(Box::new(&self.buf[..self.written as usize]))
    }

    fn destroy(self: Box<Self>) -> Result<(), BridgeCryptError> {
        debug!(bytes = self.written, "memory chunk store released");
        Ok(())
    }
}

/// Temporary-file-backed store for files that should not live on the heap.
/// The file is removed when the store is destroyed or dropped.
pub struct FsChunkStore {
    temp: NamedTempFile,
    file: File,
    written: u64,
    capacity: u64,
}

impl FsChunkStore {
    pub fn open(dir: Option<&Path>, capacity: u64) -> Result<Self, BridgeCryptError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bridgecrypt-").suffix(".chunks");
        let temp = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| BridgeCryptError::storage(format!("creating chunk store file: {}", e)))?;
        let file = File::from_std(temp.as_file().try_clone()?);
        debug!(path = %temp.path().display(), capacity, "filesystem chunk store opened");

        Ok(Self {
            temp,
            file,
            written: 0,
            capacity,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.temp.path().to_path_buf()
    }

    fn reopen(&self) -> Result<File, BridgeCryptError> {
        Ok(File::from_std(self.temp.reopen()?))
    }
}

impl fmt::Debug for FsChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsChunkStore")
            .field("path", &self.temp.path())
            .field("written", &self.written)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn len(&self) -> u64 {
        self.written
    }

    fn writer(&mut self) -> StoreWriter<'_> {
        StoreWriter::new(&mut self.file, &mut self.written, self.capacity)
    }

    async fn get(&self, offset: u64, len: u64) -> Result<Vec<u8>, BridgeCryptError> {
        check_range(offset, len, self.written)?;
        let mut file = self.reopen()?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn reader(&self) -> Result<Box<dyn AsyncRead + Send + Unpin + '_>, BridgeCryptError> {
        Ok(Box::new(self.reopen()?.take(self.written)))
    }

    fn destroy(self: Box<Self>) -> Result<(), BridgeCryptError> {
        let Self { temp, file, written, .. } = *self;
        drop(file);
        debug!(path = %temp.path().display(), bytes = written, "filesystem chunk store released");
        temp.close()
            .map_err(|e| BridgeCryptError::storage(format!("removing chunk store file: {}", e)))
    }
}
