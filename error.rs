use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Error kinds surfaced by transfers and bucket administration
#[derive(Debug, Error)]
pub enum BridgeCryptError {
    /// The bridge refused to issue a token (auth or permission failure)
    #[error("Token denied: {0}")]
    TokenDenied(String),

    /// Private bucket accessed without caller-held key material
    #[error("Missing decryption key: {0}")]
    MissingDecryptionKey(String),

    /// A bridge round trip failed at the transport level
    #[error("Network error: {0}")]
    Network(String),

    /// A bridge round trip exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// One or more shards could not be fetched or reassembled
    #[error("Pointer resolution failed: {0}")]
    PointerResolutionFailed(String),

    /// The bridge rejected the final store call
    #[error("Submit failed: {0}")]
    SubmitFailed(String),

    /// The bridge rejected a bucket administration request
    #[error("Bridge rejected request: {0}")]
    Rejected(String),

    /// Encryption operation failures
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decryption failures (wrong key, tampered or truncated ciphertext)
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Source stream and chunk store I/O errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Ciphertext framing errors (version mismatch, oversized chunks)
    #[error("Format error: {0}")]
    Format(String),

    /// Key-related errors (loading, parsing, generation)
    #[error("Key error: {0}")]
    Key(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl BridgeCryptError {
    pub fn token_denied(msg: impl Into<String>) -> Self {
        Self::TokenDenied(msg.into())
    }

    pub fn missing_key(msg: impl Into<String>) -> Self {
        Self::MissingDecryptionKey(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn pointer_resolution(msg: impl Into<String>) -> Self {
        Self::PointerResolutionFailed(msg.into())
    }

    pub fn submit(msg: impl Into<String>) -> Self {
        Self::SubmitFailed(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn key(msg: impl Into<String>) -> Self {
        Self::Key(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a fresh transfer (with a fresh token) may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for BridgeCryptError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Errors raised by the bridge HTTP layer before classification
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Reqwest(e) if e.is_timeout())
    }

    /// True when the bridge refused the request itself (4xx other than 429).
    /// Server errors and rate limiting are outages, not refusals.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus(status, _)
                if status.is_client_error() && *status != StatusCode::TOO_MANY_REQUESTS
        )
    }

    /// Classify into the transfer taxonomy, with `rejected` building the
    /// step-specific kind for a bridge that refused the request.
    pub(crate) fn classify(
        self,
        timeout: Duration,
        rejected: impl FnOnce(String) -> BridgeCryptError,
    ) -> BridgeCryptError {
        if self.is_timeout() {
            BridgeCryptError::Timeout(timeout)
        } else if self.is_rejection() {
            rejected(self.to_string())
        } else {
            BridgeCryptError::Network(self.to_string())
        }
    }
}
