use std::time::Duration;

use crate::{MediaKind, UploadError, UploadResult};

const MB: u64 = 1024 * 1024;

/// Configuration for the upload subsystem
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Try the signed-POST strategy first when the caller is authenticated
    pub prefer_signed_post: bool,

    /// Skip the resumable strategy and go straight to the simple one
    pub force_simple_upload: bool,

    /// Alternate trigger with the same effect as `force_simple_upload`
    pub force_skip_resumable: bool,

    /// Watchdog and retry budget for the retryable strategies
    pub retry: RetryPolicy,

    /// Per media class size ceilings
    pub size_limits: SizeLimits,

    /// Chunk size used by the bundled stores for resumable transfers
    pub resumable_chunk_bytes: u64,

    /// Lifetime requested for signed download URLs
    pub download_url_ttl: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            prefer_signed_post: false,
            // Chunked transfers break behind some proxies
            force_simple_upload: true,
            force_skip_resumable: false,
            retry: RetryPolicy::default(),
            size_limits: SizeLimits::default(),
            resumable_chunk_bytes: 256 * 1024,
            download_url_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load flags from the process environment.
    ///
    /// Recognised: `USE_SIGNED_POST`, `FORCE_SIMPLE_UPLOAD`, `FORCE_FETCH_UPLOAD`,
    /// `UPLOAD_TIMEOUT_MS`, `UPLOAD_RETRIES`, `UPLOAD_BACKOFF_BASE_MS`.
    pub fn from_env() -> UploadResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load flags through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> UploadResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("USE_SIGNED_POST") {
            config.prefer_signed_post = parse_bool("USE_SIGNED_POST", &v)?;
        }
        if let Some(v) = lookup("FORCE_SIMPLE_UPLOAD") {
            config.force_simple_upload = parse_bool("FORCE_SIMPLE_UPLOAD", &v)?;
        }
        if let Some(v) = lookup("FORCE_FETCH_UPLOAD") {
            config.force_skip_resumable = parse_bool("FORCE_FETCH_UPLOAD", &v)?;
        }
        if let Some(v) = lookup("UPLOAD_TIMEOUT_MS") {
            config.retry.timeout = Duration::from_millis(parse_u64("UPLOAD_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("UPLOAD_RETRIES") {
            config.retry.retries = parse_u32("UPLOAD_RETRIES", &v)?;
        }
        if let Some(v) = lookup("UPLOAD_BACKOFF_BASE_MS") {
            config.retry.backoff_base =
                Duration::from_millis(parse_u64("UPLOAD_BACKOFF_BASE_MS", &v)?);
        }

        Ok(config)
    }

    pub fn with_signed_post(mut self, enabled: bool) -> Self {
        self.prefer_signed_post = enabled;
        self
    }

    pub fn with_force_simple_upload(mut self, enabled: bool) -> Self {
        self.force_simple_upload = enabled;
        self
    }

    pub fn with_force_skip_resumable(mut self, enabled: bool) -> Self {
        self.force_skip_resumable = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_size_limits(mut self, limits: SizeLimits) -> Self {
        self.size_limits = limits;
        self
    }

    pub fn with_resumable_chunk_bytes(mut self, bytes: u64) -> Self {
        self.resumable_chunk_bytes = bytes.max(1);
        self
    }

    pub fn with_download_url_ttl(mut self, ttl: Duration) -> Self {
        self.download_url_ttl = ttl;
        self
    }

    /// Whether the resumable strategy takes part in the chain
    pub fn resumable_enabled(&self) -> bool {
        !self.force_simple_upload && !self.force_skip_resumable
    }
}

/// Watchdog timeout and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Max silence between progress ticks before an attempt is cancelled
    pub timeout: Duration,

    /// Extra attempts after the first one
    pub retries: u32,

    /// Linear backoff unit: attempt `n` waits `n * backoff_base`
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(120_000),
            retries: 2,
            backoff_base: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

/// Size ceilings per media class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub image: u64,
    pub video: u64,
    pub audio: u64,
    pub archive: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            image: 4 * MB,
            video: 80 * MB,
            audio: 100 * MB,
            archive: 500 * MB,
        }
    }
}

impl SizeLimits {
    pub fn limit_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image,
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
            MediaKind::Archive => self.archive,
        }
    }

    /// The class with the smallest ceiling, used for unrecognised content
    pub fn most_restrictive(&self) -> (MediaKind, u64) {
        [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::Archive,
        ]
        .into_iter()
        .map(|k| (k, self.limit_for(k)))
        .min_by_key(|(_, limit)| *limit)
        .unwrap_or((MediaKind::Image, self.image))
    }
}

fn parse_bool(key: &str, value: &str) -> UploadResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(UploadError::invalid(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

fn parse_u32(key: &str, value: &str) -> UploadResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        UploadError::invalid(format!(
            "{} must be an integer between 0 and {}, got {:?}",
            key,
            u32::MAX,
            value
        ))
    })
}

fn parse_u64(key: &str, value: &str) -> UploadResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| UploadError::invalid(format!("{} must be an integer, got {:?}", key, value)))
}
