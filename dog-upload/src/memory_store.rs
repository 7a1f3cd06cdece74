use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    ObjectMetadata, ObjectStorage, PutAck, StoreCapabilities, TickSender, TransferTick,
    UploadConfig, UploadError, UploadResult,
};

const DEFAULT_CHUNK_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    metadata: ObjectMetadata,
}

/// In-process object storage for development and tests.
///
/// Resumable puts are split into chunks with a tick after each one, so
/// progress and cancellation behave like a real chunked transfer.
#[derive(Debug)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
    base_url: String,
    chunk_bytes: usize,
}

impl MemoryObjectStorage {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    /// Use the chunk size from an upload config
    pub fn from_config<S: Into<String>>(base_url: S, config: &UploadConfig) -> Self {
        Self::new(base_url).with_chunk_bytes(config.resumable_chunk_bytes as usize)
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.read().get(path).map(|o| o.body.clone())
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.read().get(path).map(|o| o.metadata.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, path: &str, body: Bytes, metadata: &ObjectMetadata) -> PutAck {
        let size = body.len() as u64;
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(
            path.to_string(),
            StoredObject {
                body,
                metadata: metadata.clone(),
            },
        );
        PutAck::new(size)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> UploadResult<PutAck> {
        Ok(self.store(path, body, metadata))
    }

    async fn put_resumable(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
        ticks: TickSender,
        cancel: CancellationToken,
    ) -> UploadResult<PutAck> {
        let total = body.len() as u64;
        let mut sent = 0usize;

        while sent < body.len() {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            sent = (sent + self.chunk_bytes).min(body.len());
            // The receiver going away only means nobody is watching progress
            let _ = ticks.send(TransferTick::new(sent as u64, total));
            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(self.store(path, body, metadata))
    }

    async fn resolve_download_url(&self, path: &str) -> UploadResult<String> {
        if !self.contains(path) {
            return Err(UploadError::not_found(path));
        }
        Ok(format!("{}/{}", self.base_url, path))
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_resumable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_resumable_ticks_per_chunk() {
        let store = MemoryObjectStorage::new("https://cdn.test/").with_chunk_bytes(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ack = store
            .put_resumable(
                "a/b.bin",
                Bytes::from_static(b"0123456789"),
                &ObjectMetadata::new("application/octet-stream"),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ack.size_bytes, 10);
        let mut seen = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            seen.push(tick.bytes_transferred);
        }
        assert_eq!(seen, vec![4, 8, 10]);
        assert_eq!(
            store.resolve_download_url("a/b.bin").await.unwrap(),
            "https://cdn.test/a/b.bin"
        );
    }

    #[tokio::test]
    async fn test_cancelled_resumable_stores_nothing() {
        let store = MemoryObjectStorage::new("https://cdn.test");
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .put_resumable(
                "x",
                Bytes::from_static(b"data"),
                &ObjectMetadata::new("image/jpeg"),
                tx,
                cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryObjectStorage::new("https://cdn.test");
        assert!(matches!(
            store.resolve_download_url("nope").await,
            Err(UploadError::NotFound { .. })
        ));
    }
}
