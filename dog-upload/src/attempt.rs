use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AttemptError;

/// Transport strategies, in chain priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    SignedPost,
    Resumable,
    Simple,
}

impl StrategyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedPost => "signed_post",
            Self::Resumable => "resumable",
            Self::Simple => "simple",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    Timeout,
    Error { message: String },
}

/// One try of one strategy. Lives only as diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub strategy: StrategyId,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub timeout_ms: Option<u64>,
    pub outcome: AttemptOutcome,
}

impl TransferAttempt {
    pub fn start(strategy: StrategyId, attempt_number: u32, timeout_ms: Option<u64>) -> Self {
        Self {
            strategy,
            attempt_number,
            started_at: Utc::now(),
            timeout_ms,
            outcome: AttemptOutcome::Pending,
        }
    }

    pub fn succeed(mut self) -> Self {
        self.outcome = AttemptOutcome::Success;
        self
    }

    pub fn fail(mut self, error: &AttemptError) -> Self {
        self.outcome = match error {
            AttemptError::Timeout { .. } => AttemptOutcome::Timeout,
            other => AttemptOutcome::Error {
                message: other.to_string(),
            },
        };
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }
}

/// Ordered trail of attempts made for one upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    attempts: Vec<TransferAttempt>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, attempt: TransferAttempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[TransferAttempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Strategy of each attempt, in order
    pub fn strategy_sequence(&self) -> Vec<StrategyId> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }

    pub fn count_for(&self, strategy: StrategyId) -> usize {
        self.attempts.iter().filter(|a| a.strategy == strategy).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
