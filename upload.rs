//! Upload orchestration: token, key, encrypt into a chunk store, submit.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::BridgeCryptError;
use crate::events::{EventSender, TransferEvent};
use crate::key_derivation::{calculate_file_id, derive_file_key};
use crate::metadata::{Direction, FileDescriptor, FileUpload};
use crate::session::Session;
use crate::streaming::{ciphertext_len, CipherDirection, CipherPipeline};
use crate::transfer::{FailAt, Transfer, TransferFailure, TransferState};

/// A named plaintext stream of known length
pub struct FileSource {
    name: String,
    size: u64,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            reader: Box::new(reader),
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(name, size, Cursor::new(data))
    }

    /// Open a local file; the remote name is its file name
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BridgeCryptError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BridgeCryptError::storage(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(name, size, file))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// Remote name for `name` under `destination`; `/` and empty are the bucket root
pub fn remote_name(destination: &str, name: &str) -> String {
    let prefix = destination.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[derive(Debug, Clone)]
pub struct Uploader {
    session: Session,
    events: EventSender,
}

impl Uploader {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            events: EventSender::default(),
        }
    }

    /// Receive [`TransferEvent`]s for every upload started after this call
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (events, rx) = EventSender::channel();
        self.events = events;
        rx
    }

    /// Encrypt `source` and store it in the session's bucket under `destination`.
    pub async fn upload(
        &self,
        mut source: FileSource,
        destination: &str,
    ) -> Result<FileDescriptor, TransferFailure> {
        let mut transfer = Transfer::new(
            Direction::Push,
            self.session.bucket_id().unwrap_or_default(),
            self.events.clone(),
        );
        let bucket_id = self.session.require_bucket().fail_at(&mut transfer)?;

        transfer.advance(TransferState::TokenRequested);
        let token = self
            .session
            .tokens()
            .request(bucket_id, Direction::Push)
            .await
            .fail_at(&mut transfer)?;

        let master = token
            .encryption_key()
            .or(self.session.key_material())
            .cloned()
            .ok_or_else(|| {
                BridgeCryptError::missing_key(format!(
                    "bucket {} has no public key and no key material was supplied",
                    bucket_id
                ))
            })
            .fail_at(&mut transfer)?;

        let remote = remote_name(destination, &source.name);
        let file_id = calculate_file_id(bucket_id, &remote);
        transfer.set_file_id(file_id.as_str());
        let file_key = derive_file_key(&master, &file_id).fail_at(&mut transfer)?;
        transfer.advance(TransferState::KeyDerived);

        let expected = ciphertext_len(source.size);
        let mut store = self.session.stores().open(expected).fail_at(&mut transfer)?;
        transfer.advance(TransferState::Encrypting);

        let pipeline = CipherPipeline::new(&file_key);
        let plain_bytes = {
            let mut writer = store.writer();
            pipeline
                .run(CipherDirection::Encrypt, &mut source.reader, &mut writer)
                .await
        }
        .fail_at(&mut transfer)?;

        if plain_bytes != source.size || store.len() != expected {
            return Err(transfer.fail(BridgeCryptError::storage(format!(
                "{} produced {} bytes, expected {}",
                source.name, plain_bytes, source.size
            ))));
        }
        transfer.advance(TransferState::Buffered);
        transfer.ready();
        debug!(bucket = bucket_id, file = %file_id, bytes = expected, "ciphertext buffered");

        transfer.advance(TransferState::Submitting);
        let ciphertext = store.read_all().await.fail_at(&mut transfer)?;
        store.destroy().fail_at(&mut transfer)?;

        let upload = FileUpload {
            mimetype: mime_guess::from_path(&remote)
                .first_or_octet_stream()
                .to_string(),
            filename: remote,
            ciphertext: Bytes::from(ciphertext),
        };
        let token = token.redeem();
        let descriptor = self
            .session
            .call(
                self.session.bridge().store_file(bucket_id, &token, upload),
                BridgeCryptError::submit,
            )
            .await
            .fail_at(&mut transfer)?;
        if descriptor.id != file_id {
            return Err(transfer.fail(BridgeCryptError::submit(format!(
                "bridge stored {} as {}, expected {}",
                descriptor.filename, descriptor.id, file_id
            ))));
        }

        transfer.advance(TransferState::Done);
        info!(
            bucket = bucket_id,
            file = %descriptor.id,
            name = %descriptor.filename,
            bytes = descriptor.size,
            "upload complete"
        );
        self.events.emit(TransferEvent::Uploaded(descriptor.clone()));
        Ok(descriptor)
    }

    /// Upload each source as an independent transfer, at most
    /// `file_concurrency` at a time. Results keep the input order.
    pub async fn upload_many(
        &self,
        sources: Vec<FileSource>,
        destination: &str,
    ) -> Vec<Result<FileDescriptor, TransferFailure>> {
        stream::iter(sources)
            .map(|source| self.upload(source, destination))
            .buffered(self.session.file_concurrency())
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name() {
        assert_eq!(remote_name("/", "a.txt"), "a.txt");
        assert_eq!(remote_name("", "a.txt"), "a.txt");
        assert_eq!(remote_name("/photos/2024/", "a.jpg"), "photos/2024/a.jpg");
    }

    #[tokio::test]
    async fn test_file_source_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.name(), "notes.txt");
        assert_eq!(source.size(), 5);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let err = FileSource::open("/definitely/not/here.bin").await.unwrap_err();
        assert!(matches!(err, BridgeCryptError::Storage(_)));
    }
}
