//! # bridgecrypt - Client-side encryption over a sharded bridge store
//!
//! bridgecrypt encrypts files on the client before they reach a
//! bridge-mediated storage network, and decrypts them after their shards
//! are fetched back. Per-file keys are derived from a bucket master secret
//! and a deterministic file id, so no key registry is ever stored.
//!
//! ## Features
//!
//! - **Chunked XChaCha20-Poly1305**: streaming authenticated encryption;
//!   wrong keys, truncation and tampering are detected
//! - **Deterministic keys**: HKDF-SHA256 over (master secret, file id)
//! - **Single-use tokens**: a token is consumed when presented to the bridge
//! - **Pluggable staging**: in-memory or temp-file chunk stores
//! - **Ordered shard reconstruction** with bounded fetch concurrency
//! - **Typed results** plus an optional event stream per orchestrator
//!
//! ## Quick Start
//!
//! ```no_run
//! use bridgecrypt::{config::Config, session::Session, upload::{FileSource, Uploader}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut cfg = Config::new("https://api.storj.io");
//!     cfg.bucket_id = Some("my-bucket".into());
//!     cfg.keypass = Some("private bucket secret".into());
//!     let session = Session::from_config(&cfg)?;
//!
//!     let uploader = Uploader::new(session.clone());
//!     let file = uploader
//!         .upload(FileSource::from_bytes("hello.txt", "hello"), "/")
//!         .await?;
//!
//!     let downloader = bridgecrypt::download::Downloader::new(session);
//!     let out = downloader.download("my-bucket", &file.id).await?;
//!     assert_eq!(out.data, b"hello");
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod bucket;
pub mod chunk_store;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod key_derivation;
pub mod key_manager;
pub mod metadata;
pub mod session;
pub mod streaming;
pub mod token;
pub mod transfer;
pub mod upload;

// Re-export common types for convenience
pub use error::{BridgeCryptError, BridgeError};
pub use metadata::Direction;
pub use session::Session;
pub use transfer::{TransferFailure, TransferState};
