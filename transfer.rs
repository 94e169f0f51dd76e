//! Lifecycle of a single upload or download.
//!
//! A [`Transfer`] walks one fixed path of [`TransferState`]s and ends in
//! either `Done` or `Error`; it is never reused.
//!
//! ```text
//! PUSH: Init -> TokenRequested -> KeyDerived -> Encrypting -> Buffered -> Submitting -> Done
//! PULL: Init -> TokenRequested -> PointersResolved -> Reconstructing -> KeyDerived -> Decrypting -> Done
//! ```
//!
//! Every non-terminal state can also fall into `Error`.

use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::BridgeCryptError;
use crate::events::{EventSender, TransferEvent};
use crate::metadata::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Init,
    TokenRequested,
    PointersResolved,
    Reconstructing,
    KeyDerived,
    Encrypting,
    Decrypting,
    Buffered,
    Submitting,
    Done,
    Error,
}

use TransferState::*;

pub const UPLOAD_PATH: [TransferState; 7] = [
    Init,
    TokenRequested,
    KeyDerived,
    Encrypting,
    Buffered,
    Submitting,
    Done,
];

pub const DOWNLOAD_PATH: [TransferState; 7] = [
    Init,
    TokenRequested,
    PointersResolved,
    Reconstructing,
    KeyDerived,
    Decrypting,
    Done,
];

impl TransferState {
    /// Next state on success, or `None` for terminal states
    pub fn successor(self, direction: Direction) -> Option<TransferState> {
        let path = match direction {
            Direction::Push => &UPLOAD_PATH,
            Direction::Pull => &DOWNLOAD_PATH,
        };
        let pos = path.iter().position(|s| *s == self)?;
        path.get(pos + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Done | Error)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Init => "init",
            TokenRequested => "token_requested",
            PointersResolved => "pointers_resolved",
            Reconstructing => "reconstructing",
            KeyDerived => "key_derived",
            Encrypting => "encrypting",
            Decrypting => "decrypting",
            Buffered => "buffered",
            Submitting => "submitting",
            Done => "done",
            Error => "error",
        };
        f.write_str(name)
    }
}

/// Terminal failure: which transfer, the state it failed in, and why
#[derive(Debug, Error)]
#[error("{direction} transfer failed at {state}: {error}")]
pub struct TransferFailure {
    pub direction: Direction,
    pub state: TransferState,
    pub bucket_id: String,
    pub file_id: Option<String>,
    #[source]
    pub error: BridgeCryptError,
}

impl TransferFailure {
    pub fn kind(&self) -> &BridgeCryptError {
        &self.error
    }
}

#[derive(Debug)]
pub struct Transfer {
    direction: Direction,
    bucket_id: String,
    file_id: Option<String>,
    state: TransferState,
    events: EventSender,
}

impl Transfer {
    pub(crate) fn new(direction: Direction, bucket_id: impl Into<String>, events: EventSender) -> Self {
        Self {
            direction,
            bucket_id: bucket_id.into(),
            file_id: None,
            state: Init,
            events,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    pub(crate) fn set_file_id(&mut self, file_id: impl Into<String>) {
        self.file_id = Some(file_id.into());
    }

    pub(crate) fn advance(&mut self, next: TransferState) {
        debug_assert_eq!(
            self.state.successor(self.direction),
            Some(next),
            "illegal {} transition from {}",
            self.direction,
            self.state
        );
        debug!(
            direction = %self.direction,
            bucket = %self.bucket_id,
            file = ?self.file_id,
            from = %self.state,
            to = %next,
            "transfer state change"
        );
        self.state = next;
        self.events.emit(TransferEvent::State {
            direction: self.direction,
            bucket_id: self.bucket_id.clone(),
            state: next,
        });
    }

    pub(crate) fn ready(&self) {
        self.events.emit(TransferEvent::Ready {
            direction: self.direction,
            bucket_id: self.bucket_id.clone(),
            file_id: self.file_id.clone(),
        });
    }

    pub(crate) fn fail(&mut self, error: BridgeCryptError) -> TransferFailure {
        let state = self.state;
        self.state = Error;
        error!(
            direction = %self.direction,
            bucket = %self.bucket_id,
            file = ?self.file_id,
            state = %state,
            error = %error,
            "transfer failed"
        );
        self.events.emit(TransferEvent::Failed {
            direction: self.direction,
            state,
            message: error.to_string(),
        });
        TransferFailure {
            direction: self.direction,
            state,
            bucket_id: self.bucket_id.clone(),
            file_id: self.file_id.clone(),
            error,
        }
    }
}

/// Turns a step's error into a terminal failure of `transfer`
pub(crate) trait FailAt<T> {
    fn fail_at(self, transfer: &mut Transfer) -> Result<T, TransferFailure>;
}

impl<T> FailAt<T> for Result<T, BridgeCryptError> {
    fn fail_at(self, transfer: &mut Transfer) -> Result<T, TransferFailure> {
        self.map_err(|e| transfer.fail(e))
    }
}
