use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::strategy::{Transfer, UploadStrategy};
use crate::{
    AttemptError, Diagnostics, ObjectStorage, ProgressObserver, ResumableStrategy,
    SignedPostStrategy, SimpleStrategy, StrategyId, TransferAttempt, UploadConfig,
};
use crate::{FormUploader, PolicyIssuer};

/// Why the chain stopped without a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every strategy used up its attempts
    Exhausted,
    /// The caller's token fired
    Cancelled,
}

/// Result of driving a transfer through the chain
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    Success {
        strategy: StrategyId,
        diagnostics: Diagnostics,
    },
    Failure {
        kind: FailureKind,
        diagnostics: Diagnostics,
    },
}

impl ChainOutcome {
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            Self::Success { diagnostics, .. } | Self::Failure { diagnostics, .. } => diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Ordered list of strategies, each with its own retry budget
#[derive(Clone, Default)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn UploadStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn UploadStrategy>>) -> Self {
        Self { strategies }
    }

    /// Build the standard chain: signed-POST (when enabled and wired),
    /// resumable (unless forced off), then simple.
    pub fn from_config(
        config: &UploadConfig,
        storage: Arc<dyn ObjectStorage>,
        signer: Option<(Arc<dyn PolicyIssuer>, Arc<dyn FormUploader>)>,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn UploadStrategy>> = Vec::new();

        if config.prefer_signed_post {
            if let Some((issuer, uploader)) = signer {
                strategies.push(Arc::new(SignedPostStrategy::new(issuer, uploader)));
            }
        }
        if config.resumable_enabled() {
            strategies.push(Arc::new(ResumableStrategy::new(storage.clone())));
        }
        strategies.push(Arc::new(SimpleStrategy::new(storage)));

        Self { strategies }
    }

    pub fn push(mut self, strategy: Arc<dyn UploadStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn ids(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Try each strategy in order until one stores the payload.
    ///
    /// Retryable failures back off linearly (`attempt * backoff_base`) and
    /// retry within the strategy; once its budget is spent, or on a
    /// non-retryable failure, control falls through to the next strategy.
    /// Cancellation ends the running attempt once its transport has wound
    /// down, and nothing further is tried.
    pub async fn run(
        &self,
        transfer: &Transfer,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> ChainOutcome {
        let mut diagnostics = Diagnostics::new();

        for strategy in &self.strategies {
            let id = strategy.id();
            if !strategy.is_available(transfer) {
                debug!(strategy = %id, "strategy unavailable, skipping");
                continue;
            }

            let max_attempts = if strategy.retryable() {
                transfer.policy.max_attempts()
            } else {
                1
            };
            let timeout_ms = strategy
                .watchdog_timeout(transfer)
                .map(|t| t.as_millis() as u64);

            for attempt in 1..=max_attempts {
                if cancel.is_cancelled() {
                    return ChainOutcome::Failure {
                        kind: FailureKind::Cancelled,
                        diagnostics,
                    };
                }

                debug!(strategy = %id, attempt, max_attempts, path = %transfer.path, "starting upload attempt");
                let record = TransferAttempt::start(id, attempt, timeout_ms);

                let result = match strategy.attempt(transfer, progress, cancel).await {
                    Err(_) if cancel.is_cancelled() => Err(AttemptError::Cancelled),
                    other => other,
                };

                match result {
                    Ok(()) => {
                        diagnostics.record(record.succeed());
                        info!(strategy = %id, attempt, path = %transfer.path, "upload stored");
                        return ChainOutcome::Success {
                            strategy: id,
                            diagnostics,
                        };
                    }
                    Err(AttemptError::Cancelled) => {
                        diagnostics.record(record.fail(&AttemptError::Cancelled));
                        info!(strategy = %id, attempt, "upload cancelled");
                        return ChainOutcome::Failure {
                            kind: FailureKind::Cancelled,
                            diagnostics,
                        };
                    }
                    Err(err) => {
                        warn!(strategy = %id, attempt, max_attempts, error = %err, "upload attempt failed");
                        let retry = err.is_retryable() && attempt < max_attempts;
                        diagnostics.record(record.fail(&err));

                        if !retry {
                            break;
                        }

                        let delay = transfer.policy.backoff_for(attempt);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return ChainOutcome::Failure {
                                    kind: FailureKind::Cancelled,
                                    diagnostics,
                                };
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            warn!(strategy = %id, "strategy gave up, falling through");
        }

        error!(
            attempts = diagnostics.len(),
            path = %transfer.path,
            "all upload strategies exhausted"
        );
        ChainOutcome::Failure {
            kind: FailureKind::Exhausted,
            diagnostics,
        }
    }
}
