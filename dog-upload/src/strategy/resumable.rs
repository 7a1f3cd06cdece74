use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transfer, UploadStrategy};
use crate::watchdog::Watchdog;
use crate::{AttemptError, ObjectStorage, ProgressObserver, StrategyId};

/// Chunked transfer guarded by a stall watchdog.
///
/// The watchdog is re-armed on every progress tick; if it fires the attempt's
/// token is cancelled and the attempt ends as a timeout. Cancellation is left
/// to the store, which gets to abort whatever it already sent before the
/// attempt returns.
pub struct ResumableStrategy {
    storage: Arc<dyn ObjectStorage>,
}

impl ResumableStrategy {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl UploadStrategy for ResumableStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Resumable
    }

    fn is_available(&self, _transfer: &Transfer) -> bool {
        self.storage.capabilities().supports_resumable
    }

    fn watchdog_timeout(&self, transfer: &Transfer) -> Option<Duration> {
        Some(transfer.policy.timeout)
    }

    async fn attempt(
        &self,
        transfer: &Transfer,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        let timeout = transfer.policy.timeout;
        let token = cancel.child_token();
        let watchdog = Watchdog::arm(timeout, token.clone());
        let (tx, mut ticks) = mpsc::unbounded_channel();

        let upload = self.storage.put_resumable(
            &transfer.path,
            transfer.body.clone(),
            &transfer.metadata,
            tx,
            token.clone(),
        );
        tokio::pin!(upload);

        let mut ticks_open = true;
        let result = loop {
            tokio::select! {
                res = &mut upload => break res.map(|_| ()),
                tick = ticks.recv(), if ticks_open => match tick {
                    Some(tick) => {
                        watchdog.kick();
                        progress.on_progress(tick.percent());
                    }
                    None => ticks_open = false,
                },
            }
        };

        let timed_out = watchdog.disarm();
        match result {
            Ok(()) => Ok(()),
            Err(_) if timed_out => {
                debug!(path = %transfer.path, "resumable transfer stalled");
                Err(AttemptError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
