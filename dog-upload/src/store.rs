use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ObjectMetadata, TransferTick, UploadCtx, UploadResult};

/// Sender side of a resumable transfer's progress ticks
pub type TickSender = mpsc::UnboundedSender<TransferTick>;

/// Object-storage service primitives - implemented by every backend
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a whole payload in one request
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> UploadResult<PutAck>;

    /// Store a payload in chunks, sending a tick after each one.
    ///
    /// Implementations must stop, release any partially stored parts and
    /// return `UploadError::Cancelled` once `cancel` fires. The future is
    /// always polled to completion, so cleanup may await.
    async fn put_resumable(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
        ticks: TickSender,
        cancel: CancellationToken,
    ) -> UploadResult<PutAck>;

    /// Turn a stored path into a fetchable URL
    async fn resolve_download_url(&self, path: &str) -> UploadResult<String>;

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic()
    }
}

/// Trusted endpoint that mints short-lived upload targets
#[async_trait]
pub trait PolicyIssuer: Send + Sync {
    async fn request_upload_policy(
        &self,
        ctx: &UploadCtx,
        path: &str,
        content_type: &str,
    ) -> UploadResult<UploadPolicy>;
}

/// Submits a payload as a form to a pre-authorized target
#[async_trait]
pub trait FormUploader: Send + Sync {
    async fn submit(
        &self,
        policy: &UploadPolicy,
        body: Bytes,
        content_type: &str,
    ) -> UploadResult<()>;
}

/// Pre-authorized POST target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    #[serde(rename = "url")]
    pub post_url: String,
    #[serde(rename = "fields")]
    pub form_fields: BTreeMap<String, String>,
}

impl UploadPolicy {
    pub fn new<S: Into<String>>(post_url: S) -> Self {
        Self {
            post_url: post_url.into(),
            form_fields: BTreeMap::new(),
        }
    }

    pub fn with_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.form_fields.insert(key.into(), value.into());
        self
    }
}

/// Acknowledgement of a stored object
#[derive(Debug, Clone, Default)]
pub struct PutAck {
    pub etag: Option<String>,
    pub size_bytes: u64,
}

impl PutAck {
    pub fn new(size_bytes: u64) -> Self {
        Self {
            etag: None,
            size_bytes,
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Store capabilities
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCapabilities {
    pub supports_resumable: bool,
    pub supports_signed_urls: bool,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self {
            supports_resumable: false,
            supports_signed_urls: false,
        }
    }

    pub fn with_resumable(mut self) -> Self {
        self.supports_resumable = true;
        self
    }

    pub fn with_signed_urls(mut self) -> Self {
        self.supports_signed_urls = true;
        self
    }
}

/// Strategy for generating object paths
pub trait KeyStrategy: Send + Sync {
    /// Generate a path for a new object under `folder`
    fn object_key(&self, folder: &str, content_type: &str) -> String;
}

/// Default key strategy: folder/unix_millis_random.ext
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy;

impl KeyStrategy for DefaultKeyStrategy {
    fn object_key(&self, folder: &str, content_type: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let nonce = Uuid::new_v4().simple().to_string();

        format!(
            "{}/{}_{}.{}",
            folder.trim_end_matches('/'),
            millis,
            &nonce[..10],
            extension_for(content_type)
        )
    }
}

/// File extension for a content type
pub fn extension_for(content_type: &str) -> &'static str {
    let ct = content_type.to_ascii_lowercase();

    if ct.starts_with("image/") {
        "jpg"
    } else if ct.starts_with("video/") {
        if ct.contains("webm") {
            "webm"
        } else if ct.contains("quicktime") || ct.contains("mov") {
            "mov"
        } else {
            "mp4"
        }
    } else if ct.starts_with("audio/") {
        if ct.contains("mpeg") {
            "mp3"
        } else if ct.contains("aac") {
            "aac"
        } else if ct.contains("mp4") {
            "m4a"
        } else if ct.contains("wav") {
            "wav"
        } else if ct.contains("ogg") {
            "ogg"
        } else {
            "mp3"
        }
    } else if ct.contains("zip") {
        "zip"
    } else {
        "bin"
    }
}

/// URL/path friendly form of a display name.
///
/// Lowercases, folds common accented letters, collapses everything else that
/// is not alphanumeric into single dashes and caps the result at 60 chars.
pub fn slugify(value: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug.truncate(60);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_layout() {
        let key = DefaultKeyStrategy.object_key("album-cover/", "image/png");
        assert!(key.starts_with("album-cover/"));
        assert!(key.ends_with(".jpg"));
        assert!(!key.contains("//"));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("video/quicktime"), "mov");
        assert_eq!(extension_for("video/x-msvideo"), "mp4");
        assert_eq!(extension_for("audio/mp4"), "m4a");
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("application/zip"), "zip");
        assert_eq!(extension_for("application/pdf"), "bin");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Città  Vecchia!", "item"), "citta-vecchia");
        assert_eq!(slugify("  --  ", "album"), "album");
        assert_eq!(slugify(&"x".repeat(80), "item").len(), 60);
    }

    #[test]
    fn test_policy_wire_shape() {
        let policy: UploadPolicy = serde_json::from_str(
            r#"{"url":"https://upload.example","fields":{"key":"a/b.jpg","policy":"p"}}"#,
        )
        .unwrap();
        assert_eq!(policy.post_url, "https://upload.example");
        assert_eq!(policy.form_fields.get("key").map(String::as_str), Some("a/b.jpg"));
    }
}
