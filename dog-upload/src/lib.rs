//! # dog-upload: Resilient media uploads for DogRS applications
//!
//! `dog-upload` moves locally selected payloads (images, audio, video,
//! archives) into object storage over unreliable networks. It reports
//! progress, never uploads the same payload twice in a process, and degrades
//! to simpler transports when the network breaks the preferred one.
//!
//! ## Key Features
//!
//! - **Size guard**: oversized payloads are rejected before any network call
//! - **Content cache**: identical payloads resolve to the URL of the first upload
//! - **Strategy chain**: signed-POST, then resumable, then simple, each with its own retry budget
//! - **Stall watchdog**: resumable attempts are cancelled when progress stops
//! - **Sequential batches**: fail-fast with the URLs already obtained
//! - **Storage agnostic**: S3-compatible and in-memory stores included
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = MemoryObjectStorage::new("https://cdn.example.com");
//! let client = UploadClient::new(store, UploadConfig::default());
//!
//! let payload = Payload::from_data_url("data:image/png;base64,aGVsbG8=")?;
//! let url = client
//!     .upload_asset(
//!         UploadRequest::new(payload, "album-cover"),
//!         &UploadOptions::default(),
//!         &|percent: u8| println!("{percent}%"),
//!     )
//!     .await?;
//!
//! assert!(url.starts_with("https://cdn.example.com/album-cover/"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Your Service  │  ← Business logic only
//! ├─────────────────┤
//! │  UploadClient   │  ← Size guard, cache, batches
//! ├─────────────────┤
//! │  StrategyChain  │  ← Fallback, retry, watchdog
//! ├─────────────────┤
//! │  ObjectStorage  │  ← Storage primitives
//! └─────────────────┘
//! ```

mod attempt;
mod batch;
mod cache;
mod chain;
mod client;
mod config;
mod error;
mod guard;
mod http;
mod memory_store;
mod progress;
mod resolver;
mod s3_store;
pub mod store;
pub mod strategy;
mod types;
pub mod watchdog;

// Re-export main types for clean API
pub use attempt::{AttemptOutcome, Diagnostics, StrategyId, TransferAttempt};
pub use batch::{
    AssetUploader, BatchCoordinator, BatchFailure, BatchItem, BatchJob, BatchObserver,
    BatchPhase, BatchSuccess,
};
pub use cache::ContentCache;
pub use chain::{ChainOutcome, FailureKind, StrategyChain};
pub use client::{UploadClient, UploadOptions};
pub use config::{RetryPolicy, SizeLimits, UploadConfig};
pub use error::{AttemptError, UploadError, UploadResult};
pub use guard::SizeGuard;
pub use http::{HttpFormUploader, HttpPolicyIssuer};
pub use memory_store::MemoryObjectStorage;
pub use progress::{ChannelProgress, NoProgress, ProgressEvent, ProgressObserver, UploadStep};
pub use resolver::{ReferenceResolver, StorageRef};
pub use s3_store::{S3Config, S3ObjectStorage};
pub use store::{
    extension_for, slugify, DefaultKeyStrategy, FormUploader, KeyStrategy, ObjectStorage,
    PolicyIssuer, PutAck, StoreCapabilities, TickSender, UploadPolicy,
};
pub use strategy::{ResumableStrategy, SignedPostStrategy, SimpleStrategy, Transfer, UploadStrategy};
pub use types::{
    BatchId, Fingerprint, MediaKind, ObjectMetadata, Payload, TransferTick, UploadCtx,
    UploadRequest,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BatchItem, MemoryObjectStorage, ObjectStorage, Payload, ProgressObserver, UploadClient,
        UploadConfig, UploadCtx, UploadError, UploadOptions, UploadRequest, UploadResult,
    };
}
