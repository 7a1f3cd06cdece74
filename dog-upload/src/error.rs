use thiserror::Error;

use crate::attempt::Diagnostics;
use crate::types::MediaKind;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Caller-visible upload failures.
///
/// Individual attempt failures never show up here; they are logged and kept
/// in the [`Diagnostics`] trail of [`UploadError::AllStrategiesExhausted`].
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Payload too large for {kind}: {actual} bytes (limit: {limit})")]
    SizeExceeded {
        kind: MediaKind,
        actual: u64,
        limit: u64,
    },

    #[error("All upload strategies exhausted after {} attempts", .diagnostics.len())]
    AllStrategiesExhausted { diagnostics: Diagnostics },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Could not resolve a download URL for {path}: {reason}")]
    UrlResolution { path: String, reason: String },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Upload policy issuance failed: {message}")]
    PolicyIssuance { message: String },

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl UploadError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a policy issuance error
    pub fn policy_issuance<S: Into<String>>(message: S) -> Self {
        Self::PolicyIssuance {
            message: message.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload<S: Into<String>>(message: S) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a URL resolution error
    pub fn url_resolution<P: Into<String>, R: ToString>(path: P, reason: R) -> Self {
        Self::UrlResolution {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The attempt trail, if the failure came out of the strategy chain
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::AllStrategiesExhausted { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }

    /// Whether the chain gave up after trying every strategy
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllStrategiesExhausted { .. })
    }
}

/// Outcome of a single failed transfer attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Signed-POST policy could not be obtained
    #[error("Policy issuance failed: {0}")]
    PolicyIssuance(String),

    /// Watchdog fired before the next progress tick
    #[error("No progress within {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// Network or server failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Caller cancelled the upload
    #[error("Attempt cancelled")]
    Cancelled,
}

impl AttemptError {
    /// Create a transport error
    pub fn transport(msg: impl ToString) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a policy issuance error
    pub fn policy(msg: impl ToString) -> Self {
        Self::PolicyIssuance(msg.to_string())
    }

    /// Timeouts and transport failures may be retried within a strategy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

impl From<UploadError> for AttemptError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Cancelled => Self::Cancelled,
            UploadError::PolicyIssuance { message } => Self::PolicyIssuance(message),
            other => Self::Transport(other.to_string()),
        }
    }
}
