use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Transfer, UploadStrategy};
use crate::{AttemptError, ObjectStorage, ProgressObserver, StrategyId};

/// Whole-payload put. Reports 0 until done, then 100.
pub struct SimpleStrategy {
    storage: Arc<dyn ObjectStorage>,
}

impl SimpleStrategy {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl UploadStrategy for SimpleStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Simple
    }

    async fn attempt(
        &self,
        transfer: &Transfer,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        progress.on_progress(0);

        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            res = self.storage.put(&transfer.path, transfer.body.clone(), &transfer.metadata) => {
                res?;
                progress.on_progress(100);
                Ok(())
            }
        }
    }
}
