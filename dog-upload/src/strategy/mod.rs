//! Transport strategies tried by the [`StrategyChain`](crate::StrategyChain).

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{AttemptError, ObjectMetadata, ProgressObserver, RetryPolicy, StrategyId, UploadCtx};

mod resumable;
mod signed_post;
mod simple;

pub use resumable::ResumableStrategy;
pub use signed_post::SignedPostStrategy;
pub use simple::SimpleStrategy;

/// Everything a strategy needs to move one payload
#[derive(Debug, Clone)]
pub struct Transfer {
    pub path: String,
    pub body: Bytes,
    pub metadata: ObjectMetadata,
    pub ctx: UploadCtx,
    pub policy: RetryPolicy,
}

impl Transfer {
    pub fn new<S: Into<String>>(path: S, body: Bytes, metadata: ObjectMetadata) -> Self {
        Self {
            path: path.into(),
            body,
            metadata,
            ctx: UploadCtx::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_ctx(mut self, ctx: UploadCtx) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn content_type(&self) -> &str {
        &self.metadata.content_type
    }
}

/// One concrete way of getting bytes into object storage
#[async_trait]
pub trait UploadStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Whether failed attempts are retried with backoff
    fn retryable(&self) -> bool {
        true
    }

    /// Whether this strategy can run for the given transfer at all
    fn is_available(&self, _transfer: &Transfer) -> bool {
        true
    }

    /// Stall timeout recorded for each attempt, if the strategy has one
    fn watchdog_timeout(&self, _transfer: &Transfer) -> Option<std::time::Duration> {
        None
    }

    /// Make exactly one attempt.
    ///
    /// The chain never drops a running attempt: implementations observe
    /// `cancel` themselves and return once their transport has wound down.
    async fn attempt(
        &self,
        transfer: &Transfer,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError>;
}
