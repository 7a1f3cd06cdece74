use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{UploadError, UploadResult};

const DEFAULT_DATA_URL_TYPE: &str = "image/jpeg";
const OCTET_STREAM: &str = "application/octet-stream";

/// Identity key of a payload inside the content cache.
///
/// This is the raw payload as the caller handed it over (the encoded data URL
/// text, or the bytes themselves), not a digest of it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Bytes);

impl Fingerprint {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({} bytes)", self.0.len())
    }
}

/// Raw content to upload, plus the identity used for de-duplication
#[derive(Clone)]
pub struct Payload {
    bytes: Bytes,
    content_type: Option<String>,
    fingerprint: Fingerprint,
}

impl Payload {
    /// Wrap raw bytes; the bytes are their own fingerprint
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            fingerprint: Fingerprint(bytes.clone()),
            bytes,
            content_type: None,
        }
    }

    /// Decode a `data:<mime>;base64,<data>` string.
    ///
    /// The encoded string itself becomes the fingerprint. A header without a
    /// mime type yields `image/jpeg`.
    pub fn from_data_url(data_url: &str) -> UploadResult<Self> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| UploadError::invalid_payload("not a data URL"))?;
        let (header, body) = rest
            .split_once(',')
            .ok_or_else(|| UploadError::invalid_payload("data URL has no payload separator"))?;

        let mut params = header.split(';');
        let mime = params.next().unwrap_or_default().trim();
        let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

        let bytes = if is_base64 {
            let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(cleaned.as_bytes())
                .map_err(|e| UploadError::invalid_payload(format!("bad base64 payload: {}", e)))?
        } else {
            body.as_bytes().to_vec()
        };

        let content_type = if mime.is_empty() { DEFAULT_DATA_URL_TYPE } else { mime };

        Ok(Self {
            bytes: Bytes::from(bytes),
            content_type: Some(content_type.to_string()),
            fingerprint: Fingerprint(Bytes::copy_from_slice(data_url.as_bytes())),
        })
    }

    /// Check whether a value looks like a data URL
    pub fn is_data_url(value: &str) -> bool {
        value.starts_with("data:")
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content type declared by the payload itself (e.g. the data URL header)
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Media class used to pick a size ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Archive,
}

impl MediaKind {
    /// Classification used by the generic asset path: only images and videos
    /// are recognised, everything else gets the most restrictive limit.
    pub fn infer_generic(content_type: &str) -> Option<Self> {
        let ct = content_type.trim().to_ascii_lowercase();
        if ct.starts_with("video/") {
            Some(Self::Video)
        } else if ct.starts_with("image/") {
            Some(Self::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single upload, immutable once built
#[derive(Debug, Clone)]
pub struct UploadRequest {
    payload: Payload,
    content_type: String,
    destination: String,
    media_kind: Option<MediaKind>,
    // Set by `with_media_kind`; an explicit class survives content-type changes
    explicit_kind: bool,
    object_path: Option<String>,
}

impl UploadRequest {
    /// Create a request for the generic asset path.
    ///
    /// The content type comes from the payload when it declares one and the
    /// media class is inferred from it (image or video).
    pub fn new<S: Into<String>>(payload: Payload, destination: S) -> Self {
        let content_type = payload
            .content_type()
            .unwrap_or(OCTET_STREAM)
            .to_string();
        let media_kind = MediaKind::infer_generic(&content_type);
        Self {
            payload,
            content_type,
            destination: destination.into(),
            media_kind,
            explicit_kind: false,
            object_path: None,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        if !self.explicit_kind {
            self.media_kind = MediaKind::infer_generic(&self.content_type);
        }
        self
    }

    /// Route through a dedicated path with its own size ceiling
    pub fn with_media_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = Some(kind);
        self.explicit_kind = true;
        self
    }

    /// Use an exact object path instead of a generated key
    pub fn with_object_path<S: Into<String>>(mut self, path: S) -> Self {
        self.object_path = Some(path.into());
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.media_kind
    }

    pub fn object_path(&self) -> Option<&str> {
        self.object_path.as_deref()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.payload.fingerprint()
    }
}

/// Caller context (who is uploading, request correlation)
#[derive(Clone)]
pub struct UploadCtx {
    pub actor_id: Option<String>,
    pub request_id: String,
    credentials: Option<String>,
}

impl UploadCtx {
    pub fn new() -> Self {
        Self {
            actor_id: None,
            request_id: Uuid::new_v4().to_string(),
            credentials: None,
        }
    }

    pub fn with_actor(mut self, actor_id: String) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    /// Attach a bearer credential; required for the signed-POST strategy
    pub fn with_credentials<S: Into<String>>(mut self, token: S) -> Self {
        self.credentials = Some(token.into());
        self
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }
}

impl Default for UploadCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCtx")
            .field("actor_id", &self.actor_id)
            .field("request_id", &self.request_id)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Metadata sent with an object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub custom: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new<S: Into<String>>(content_type: S) -> Self {
        Self {
            content_type: content_type.into(),
            custom: BTreeMap::new(),
        }
    }

    pub fn with_custom<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

/// Progress report from a resumable transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTick {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferTick {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Rounded percentage, clamped to 0..=100
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = (self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Unique identifier for a batch run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new() -> Self {
        Self(format!("batch_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_decodes_and_keeps_raw_fingerprint() {
        let url = "data:image/png;base64,aGVsbG8=";
        let payload = Payload::from_data_url(url).unwrap();

        assert_eq!(payload.bytes().as_ref(), b"hello");
        assert_eq!(payload.content_type(), Some("image/png"));
        assert_eq!(payload.fingerprint().as_bytes(), url.as_bytes());
    }

    #[test]
    fn test_data_url_without_mime_defaults_to_jpeg() {
        let payload = Payload::from_data_url("data:;base64,aGk=").unwrap();
        assert_eq!(payload.content_type(), Some("image/jpeg"));
    }

    #[test]
    fn test_rejects_non_data_url() {
        assert!(Payload::from_data_url("https://example.com/a.png").is_err());
        assert!(Payload::from_data_url("data:image/png;base64").is_err());
        assert!(Payload::from_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_request_infers_generic_kind() {
        let video = Payload::from_bytes(vec![0u8; 4]).with_content_type("video/mp4");
        assert_eq!(UploadRequest::new(video, "clips").media_kind(), Some(MediaKind::Video));

        let audio = Payload::from_bytes(vec![0u8; 4]).with_content_type("audio/mpeg");
        let req = UploadRequest::new(audio, "tracks");
        assert_eq!(req.media_kind(), None);
        assert_eq!(req.with_media_kind(MediaKind::Audio).media_kind(), Some(MediaKind::Audio));
    }

    #[test]
    fn test_content_type_override_reinfers_kind() {
        let payload = Payload::from_bytes(vec![0u8; 10 * 1024 * 1024]).with_content_type("video/mp4");
        let req = UploadRequest::new(payload, "covers").with_content_type("image/png");
        assert_eq!(req.media_kind(), Some(MediaKind::Image));

        // The image ceiling applies, not the video one
        let guard = crate::SizeGuard::default();
        assert!(matches!(
            guard.check(req.payload().len(), req.media_kind()),
            Err(crate::UploadError::SizeExceeded { kind: MediaKind::Image, .. })
        ));

        let untyped = req.with_content_type("application/octet-stream");
        assert_eq!(untyped.media_kind(), None);
    }

    #[test]
    fn test_explicit_kind_survives_content_type_override() {
        let payload = Payload::from_bytes(vec![0u8; 4]).with_content_type("video/mp4");
        let req = UploadRequest::new(payload, "tracks")
            .with_media_kind(MediaKind::Audio)
            .with_content_type("image/png");
        assert_eq!(req.media_kind(), Some(MediaKind::Audio));
        assert_eq!(req.content_type(), "image/png");
    }

    #[test]
    fn test_tick_percent() {
        assert_eq!(TransferTick::new(0, 200).percent(), 0);
        assert_eq!(TransferTick::new(101, 200).percent(), 51);
        assert_eq!(TransferTick::new(300, 200).percent(), 100);
        assert_eq!(TransferTick::new(0, 0).percent(), 100);
    }

    #[test]
    fn test_ctx_debug_redacts_credentials() {
        let ctx = UploadCtx::new().with_credentials("secret-token");
        let rendered = format!("{:?}", ctx);
        assert!(!rendered.contains("secret-token"));
        assert!(ctx.is_authenticated());
    }
}
