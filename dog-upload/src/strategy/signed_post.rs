use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transfer, UploadStrategy};
use crate::{AttemptError, FormUploader, PolicyIssuer, ProgressObserver, StrategyId};

/// Form POST to a pre-authorized target minted by a policy endpoint.
///
/// Single shot: any failure falls through to the next strategy. Only runs
/// for authenticated callers.
pub struct SignedPostStrategy {
    issuer: Arc<dyn PolicyIssuer>,
    uploader: Arc<dyn FormUploader>,
}

impl SignedPostStrategy {
    pub fn new(issuer: Arc<dyn PolicyIssuer>, uploader: Arc<dyn FormUploader>) -> Self {
        Self { issuer, uploader }
    }
}

#[async_trait]
impl UploadStrategy for SignedPostStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::SignedPost
    }

    fn retryable(&self) -> bool {
        false
    }

    fn is_available(&self, transfer: &Transfer) -> bool {
        transfer.ctx.is_authenticated()
    }

    async fn attempt(
        &self,
        transfer: &Transfer,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let post = async {
            let policy = self
                .issuer
                .request_upload_policy(&transfer.ctx, &transfer.path, transfer.content_type())
                .await
                .map_err(AttemptError::policy)?;

            debug!(path = %transfer.path, post_url = %policy.post_url, "upload policy issued");

            self.uploader
                .submit(&policy, transfer.body.clone(), transfer.content_type())
                .await
                .map_err(AttemptError::from)
        };

        // A form POST leaves nothing behind to clean up, so it can be dropped
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            res = post => {
                res?;
                // No incremental progress on a form submission
                progress.on_progress(100);
                Ok(())
            }
        }
    }
}
