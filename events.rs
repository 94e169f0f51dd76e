//! Push-style transfer notifications.
//!
//! Orchestrators return typed results; callers that also want progress
//! notifications subscribe to a channel of [`TransferEvent`]s.

use tokio::sync::mpsc;

use crate::metadata::{Direction, FileDescriptor};
use crate::transfer::TransferState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A transfer entered `state`
    State {
        direction: Direction,
        bucket_id: String,
        state: TransferState,
    },
    /// Upload: all ciphertext is buffered. Download: the shard stream is assembled.
    Ready {
        direction: Direction,
        bucket_id: String,
        file_id: Option<String>,
    },
    Uploaded(FileDescriptor),
    Downloaded {
        bucket_id: String,
        file_id: String,
        bytes: u64,
    },
    Failed {
        direction: Direction,
        state: TransferState,
        message: String,
    },
}

/// Sending half handed to each transfer; a no-op until someone subscribes
#[derive(Debug, Clone, Default)]
pub struct EventSender(Option<mpsc::UnboundedSender<TransferEvent>>);

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Some(tx)), rx)
    }

    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.0 {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}
