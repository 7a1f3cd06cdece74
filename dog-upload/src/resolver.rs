use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::ObjectStorage;

const DEFAULT_SCHEME: &str = "gs";
const DEFAULT_PUBLIC_HOST: &str = "firebasestorage.googleapis.com";

/// Storage-scheme reference such as `gs://bucket/path/to/object`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    pub scheme: String,
    pub bucket: String,
    pub path: String,
}

impl StorageRef {
    /// Parse `scheme://bucket/path`. The path may be empty.
    pub fn parse(value: &str, scheme: &str) -> Option<Self> {
        let rest = value.strip_prefix(scheme)?.strip_prefix("://")?;
        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return None;
        }
        Some(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }

    /// Direct media URL for read-only display, without asking the service
    pub fn public_url(&self, host: &str) -> String {
        format!(
            "https://{}/v0/b/{}/o/{}?alt=media",
            host,
            self.bucket,
            urlencoding::encode(&self.path)
        )
    }
}

/// Rewrites legacy storage references into fetchable URLs.
///
/// Resolution never fails: anything that cannot be resolved is returned as
/// it came in, with a warning logged.
#[derive(Clone)]
pub struct ReferenceResolver {
    storage: Arc<dyn ObjectStorage>,
    scheme: String,
}

impl ReferenceResolver {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage,
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    pub fn with_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Whether a value is a storage reference this resolver handles
    pub fn is_reference(&self, value: &str) -> bool {
        StorageRef::parse(value, &self.scheme).is_some()
    }

    /// Resolve a single value; non-references pass through untouched
    pub async fn resolve(&self, value: &str) -> String {
        let Some(reference) = StorageRef::parse(value, &self.scheme) else {
            return value.to_string();
        };

        // The bucket is the one the storage client is bound to
        if reference.path.is_empty() {
            warn!(reference = %value, "storage reference has no object path");
            return value.to_string();
        }

        match self.storage.resolve_download_url(&reference.path).await {
            Ok(url) => {
                debug!(reference = %value, "resolved storage reference");
                url
            }
            Err(e) => {
                warn!(reference = %value, error = %e, "could not resolve storage reference");
                value.to_string()
            }
        }
    }

    /// Resolve a list concurrently; output order matches input order
    pub async fn resolve_all(&self, values: &[String]) -> Vec<String> {
        join_all(values.iter().map(|value| self.resolve(value))).await
    }

    /// Public URL for a reference without a service round trip
    pub fn public_url(&self, value: &str) -> Option<String> {
        StorageRef::parse(value, &self.scheme).map(|r| r.public_url(DEFAULT_PUBLIC_HOST))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryObjectStorage, ObjectMetadata, ObjectStorage};
    use bytes::Bytes;
    use tracing_test::traced_test;

    #[test]
    fn test_parse_reference() {
        let r = StorageRef::parse("gs://my-bucket/tracks/a b.mp3", "gs").unwrap();
        assert_eq!(r.bucket, "my-bucket");
        assert_eq!(r.path, "tracks/a b.mp3");

        assert!(StorageRef::parse("https://x/y", "gs").is_none());
        assert!(StorageRef::parse("gs:///path", "gs").is_none());
        assert_eq!(StorageRef::parse("gs://bucket", "gs").unwrap().path, "");
    }

    #[test]
    fn test_public_url_encodes_path() {
        let r = StorageRef::parse("gs://b/tracks/a b.mp3", "gs").unwrap();
        assert_eq!(
            r.public_url("firebasestorage.googleapis.com"),
            "https://firebasestorage.googleapis.com/v0/b/b/o/tracks%2Fa%20b.mp3?alt=media"
        );

        let r = StorageRef::parse("gs://b/covers/café (1).jpg", "gs").unwrap();
        assert_eq!(
            r.public_url("cdn.test"),
            "https://cdn.test/v0/b/b/o/covers%2Fcaf%C3%A9%20%281%29.jpg?alt=media"
        );
    }

    #[tokio::test]
    async fn test_resolves_known_object() {
        let storage = Arc::new(MemoryObjectStorage::new("https://cdn.test"));
        storage
            .put("tracks/x.mp3", Bytes::from_static(b"x"), &ObjectMetadata::new("audio/mpeg"))
            .await
            .unwrap();

        let resolver = ReferenceResolver::new(storage);
        assert_eq!(
            resolver.resolve("gs://legacy-bucket/tracks/x.mp3").await,
            "https://cdn.test/tracks/x.mp3"
        );
        assert_eq!(resolver.resolve("https://already/url").await, "https://already/url");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_keeps_original_and_logs() {
        let storage = Arc::new(MemoryObjectStorage::new("https://cdn.test"));
        let resolver = ReferenceResolver::new(storage);

        let values = vec!["gs://b/missing.mp3".to_string(), "gs://b".to_string()];
        let resolved = resolver.resolve_all(&values).await;

        assert_eq!(resolved, values);
        assert!(logs_contain("could not resolve storage reference"));
        assert!(logs_contain("storage reference has no object path"));
    }
}
