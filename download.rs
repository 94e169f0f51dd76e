//! Download orchestration: token, pointers, shard reconstruction, decrypt.
//!
//! Shards are fetched concurrently but written into the chunk store in
//! pointer order. Reconstruction is all-or-nothing: any missing, failed or
//! mis-sized shard fails the transfer before a single plaintext byte exists.

use futures::stream::{self, StreamExt};
use std::pin::pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::chunk_store::ChunkStore;
use crate::error::BridgeCryptError;
use crate::events::{EventSender, TransferEvent};
use crate::key_derivation::derive_file_key;
use crate::metadata::{Direction, Pointer};
use crate::session::Session;
use crate::streaming::{CipherDirection, CipherPipeline};
use crate::transfer::{FailAt, Transfer, TransferFailure, TransferState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub id: String,
    pub mimetype: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub id: String,
    pub mimetype: Option<String>,
    pub bytes: u64,
}

/// Sort pointers by index and check they cover `0..n` exactly once
pub fn order_pointers(mut pointers: Vec<Pointer>) -> Result<Vec<Pointer>, BridgeCryptError> {
    if pointers.is_empty() {
        return Err(BridgeCryptError::pointer_resolution(
            "bridge returned no pointers",
        ));
    }
    pointers.sort_by_key(|p| p.index);
    for (expected, pointer) in pointers.iter().enumerate() {
        if pointer.index as usize != expected {
            return Err(BridgeCryptError::pointer_resolution(format!(
                "pointer sequence broken at position {}: found index {}",
                expected, pointer.index
            )));
        }
    }
    Ok(pointers)
}

#[derive(Debug, Clone)]
pub struct Downloader {
    session: Session,
    events: EventSender,
}

impl Downloader {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            events: EventSender::default(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (events, rx) = EventSender::channel();
        self.events = events;
        rx
    }

    /// Download and decrypt into memory. Nothing is returned unless the
    /// whole file authenticated.
    pub async fn download(
        &self,
        bucket_id: &str,
        file_id: &str,
    ) -> Result<DownloadedFile, TransferFailure> {
        let mut data = Vec::new();
        let summary = self.download_to(bucket_id, file_id, &mut data).await?;
        Ok(DownloadedFile {
            id: summary.id,
            mimetype: summary.mimetype,
            data,
        })
    }

    /// Download and decrypt into `writer`. Plaintext is written chunk by
    /// chunk as each authenticates; on error, discard what was written.
    pub async fn download_to<W>(
        &self,
        bucket_id: &str,
        file_id: &str,
        writer: &mut W,
    ) -> Result<DownloadSummary, TransferFailure>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let mut transfer = Transfer::new(Direction::Pull, bucket_id, self.events.clone());
        transfer.set_file_id(file_id);

        transfer.advance(TransferState::TokenRequested);
        let token = self
            .session
            .tokens()
            .request(bucket_id, Direction::Pull)
            .await
            .fail_at(&mut transfer)?;

        // Checked before pointer resolution so a private bucket costs no shard traffic
        let master = token
            .encryption_key()
            .or(self.session.key_material())
            .cloned()
            .ok_or_else(|| {
                BridgeCryptError::missing_key(format!(
                    "bucket {} is private and no key material was supplied",
                    bucket_id
                ))
            })
            .fail_at(&mut transfer)?;
        let id = token.file_id().unwrap_or(file_id).to_string();
        let mimetype = token.mimetype().map(str::to_string);

        let token = token.redeem();
        let pointers = self
            .session
            .call(
                self.session.bridge().file_pointers(bucket_id, &token, file_id),
                BridgeCryptError::pointer_resolution,
            )
            .await
            .and_then(order_pointers)
            .fail_at(&mut transfer)?;
        debug!(bucket = bucket_id, file = file_id, shards = pointers.len(), "pointers resolved");
        transfer.advance(TransferState::PointersResolved);

        transfer.advance(TransferState::Reconstructing);
        let store = self.reconstruct(&pointers).await.fail_at(&mut transfer)?;
        transfer.ready();

        let file_key = derive_file_key(&master, file_id).fail_at(&mut transfer)?;
        transfer.advance(TransferState::KeyDerived);

        transfer.advance(TransferState::Decrypting);
        let pipeline = CipherPipeline::new(&file_key);
        let bytes = async {
            let mut reader = store.reader().await?;
            pipeline
                .run(CipherDirection::Decrypt, &mut reader, writer)
                .await
        }
        .await
        .fail_at(&mut transfer)?;
        store.destroy().fail_at(&mut transfer)?;

        transfer.advance(TransferState::Done);
        info!(bucket = bucket_id, file = file_id, bytes, "download complete");
        self.events.emit(TransferEvent::Downloaded {
            bucket_id: bucket_id.to_string(),
            file_id: file_id.to_string(),
            bytes,
        });
        Ok(DownloadSummary { id, mimetype, bytes })
    }

    /// Fetch every shard and assemble them, in pointer order, into a fresh store
    async fn reconstruct(
        &self,
        pointers: &[Pointer],
    ) -> Result<Box<dyn ChunkStore>, BridgeCryptError> {
        let total: u64 = pointers.iter().map(|p| p.size).sum();
        let mut store = self.session.stores().open(total)?;

        let shards = self.session.shards();
        let mut fetched = pin!(stream::iter(pointers)
            .map(|pointer| async move {
                let data = self
                    .session
                    .call(shards.fetch(pointer), BridgeCryptError::pointer_resolution)
                    .await;
                (pointer, data)
            })
            .buffered(self.session.shard_concurrency()));

        {
            let mut writer = store.writer();
            while let Some((pointer, data)) = fetched.next().await {
                let data = data.map_err(|e| {
                    BridgeCryptError::pointer_resolution(format!(
                        "shard {} ({}): {}",
                        pointer.index, pointer.hash, e
                    ))
                })?;
                if data.len() as u64 != pointer.size {
                    return Err(BridgeCryptError::pointer_resolution(format!(
                        "shard {} returned {} bytes, expected {}",
                        pointer.index,
                        data.len(),
                        pointer.size
                    )));
                }
                writer.write_all(&data).await?;
                debug!(index = pointer.index, bytes = data.len(), "shard assembled");
            }
            writer.flush().await?;
        }

        Ok(store)
    }
}
