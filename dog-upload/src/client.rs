use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::strategy::Transfer;
use crate::{
    AssetUploader, BatchCoordinator, BatchFailure, BatchItem, BatchObserver, BatchSuccess,
    ChainOutcome, ContentCache, DefaultKeyStrategy, FailureKind, FormUploader, KeyStrategy,
    ObjectMetadata, ObjectStorage, Payload, PolicyIssuer, ProgressObserver, ReferenceResolver,
    RetryPolicy, SizeGuard, StrategyChain, UploadConfig, UploadCtx, UploadError, UploadRequest,
    UploadResult, UploadStep,
};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub ctx: UploadCtx,
    /// Overrides the configured retry policy for this call
    pub retry: Option<RetryPolicy>,
    pub cancel: CancellationToken,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ctx(mut self, ctx: UploadCtx) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The upload entry point embedded by callers.
///
/// Runs every request through size check, content cache and the strategy
/// chain, then resolves and caches the download URL.
pub struct UploadClient {
    storage: Arc<dyn ObjectStorage>,
    keys: Arc<dyn KeyStrategy>,
    signer: Option<(Arc<dyn PolicyIssuer>, Arc<dyn FormUploader>)>,
    chain: Option<StrategyChain>,
    cache: Arc<ContentCache>,
    guard: SizeGuard,
    resolver: ReferenceResolver,
    config: UploadConfig,
}

impl UploadClient {
    /// Create a new upload client
    pub fn new<S: ObjectStorage + 'static>(storage: S, config: UploadConfig) -> Self {
        Self::from_shared(Arc::new(storage), config)
    }

    /// Create from a storage handle the caller keeps using
    pub fn from_shared(storage: Arc<dyn ObjectStorage>, config: UploadConfig) -> Self {
        Self {
            resolver: ReferenceResolver::new(storage.clone()),
            guard: SizeGuard::new(config.size_limits),
            storage,
            keys: Arc::new(DefaultKeyStrategy),
            signer: None,
            chain: None,
            cache: Arc::new(ContentCache::new()),
            config,
        }
    }

    pub fn with_key_strategy<K: KeyStrategy + 'static>(mut self, keys: K) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Wire the signed-POST path; it only runs when the config prefers it
    pub fn with_signed_post<I, F>(mut self, issuer: I, uploader: F) -> Self
    where
        I: PolicyIssuer + 'static,
        F: FormUploader + 'static,
    {
        self.signer = Some((Arc::new(issuer), Arc::new(uploader)));
        self
    }

    /// Share a cache between clients
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the config-derived strategy chain
    pub fn with_chain(mut self, chain: StrategyChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_resolver(mut self, resolver: ReferenceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    fn strategies(&self) -> StrategyChain {
        match &self.chain {
            Some(chain) => chain.clone(),
            None => StrategyChain::from_config(&self.config, self.storage.clone(), self.signer.clone()),
        }
    }

    /// Upload one payload and return its download URL
    pub async fn upload_asset(
        &self,
        request: UploadRequest,
        options: &UploadOptions,
        progress: &dyn ProgressObserver,
    ) -> UploadResult<String> {
        let size = request.payload().len();
        if let Err(e) = self.guard.check(size, request.media_kind()) {
            warn!(size, content_type = %request.content_type(), error = %e, "upload rejected");
            return Err(e);
        }

        if let Some(url) = self.cache.get(request.fingerprint()) {
            debug!(size, "content cache hit");
            progress.on_step(UploadStep::Cache);
            progress.on_progress(100);
            return Ok(url);
        }

        let path = match request.object_path() {
            Some(path) => path.to_string(),
            None => self
                .keys
                .object_key(request.destination(), request.content_type()),
        };

        let transfer = Transfer::new(
            path.clone(),
            request.payload().bytes().clone(),
            ObjectMetadata::new(request.content_type()),
        )
        .with_ctx(options.ctx.clone())
        .with_policy(options.retry.unwrap_or(self.config.retry));

        progress.on_step(UploadStep::Upload);
        let strategy = match self.strategies().run(&transfer, progress, &options.cancel).await {
            ChainOutcome::Success { strategy, .. } => strategy,
            ChainOutcome::Failure {
                kind: FailureKind::Cancelled,
                ..
            } => return Err(UploadError::Cancelled),
            ChainOutcome::Failure {
                kind: FailureKind::Exhausted,
                diagnostics,
            } => return Err(UploadError::AllStrategiesExhausted { diagnostics }),
        };

        progress.on_step(UploadStep::ResolveUrl);
        let url = self
            .storage
            .resolve_download_url(&path)
            .await
            .map_err(|e| UploadError::url_resolution(path.as_str(), e))?;

        let url = self.cache.put(request.fingerprint().clone(), url);
        progress.on_progress(100);

        info!(
            path = %path,
            strategy = %strategy,
            size,
            request_id = %options.ctx.request_id,
            "asset uploaded"
        );
        Ok(url)
    }

    /// Normalise a value into a fetchable URL.
    ///
    /// Data URLs are uploaded under `folder`, storage references are resolved
    /// and anything else is returned unchanged.
    pub async fn ensure_uploaded(
        &self,
        value: &str,
        folder: &str,
        options: &UploadOptions,
        progress: &dyn ProgressObserver,
    ) -> UploadResult<String> {
        if Payload::is_data_url(value) {
            let payload = Payload::from_data_url(value)?;
            return self
                .upload_asset(UploadRequest::new(payload, folder), options, progress)
                .await;
        }

        if self.resolver.is_reference(value) {
            return Ok(self.resolver.resolve(value).await);
        }

        Ok(value.to_string())
    }

    /// Rewrite storage references in a list; failures keep the original
    pub async fn resolve_references(&self, values: &[String]) -> Vec<String> {
        self.resolver.resolve_all(values).await
    }

    /// Upload items one after another, stopping at the first failure
    pub async fn upload_batch(
        &self,
        items: Vec<BatchItem>,
        options: &UploadOptions,
        observer: &dyn BatchObserver,
    ) -> Result<BatchSuccess, BatchFailure> {
        BatchCoordinator::new(self).run(items, options, observer).await
    }
}

#[async_trait]
impl AssetUploader for UploadClient {
    async fn upload_asset(
        &self,
        request: UploadRequest,
        options: &UploadOptions,
        progress: &dyn ProgressObserver,
    ) -> UploadResult<String> {
        UploadClient::upload_asset(self, request, options, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryObjectStorage, NoProgress};

    fn client() -> (Arc<MemoryObjectStorage>, UploadClient) {
        let storage = Arc::new(MemoryObjectStorage::new("https://cdn.test"));
        let client = UploadClient::from_shared(storage.clone(), UploadConfig::default());
        (storage, client)
    }

    #[tokio::test]
    async fn test_upload_then_cache_hit() {
        let (storage, client) = client();
        let payload = Payload::from_bytes(vec![7u8; 1024]).with_content_type("image/png");

        let first = client
            .upload_asset(
                UploadRequest::new(payload.clone(), "covers"),
                &UploadOptions::default(),
                &NoProgress,
            )
            .await
            .unwrap();
        let second = client
            .upload_asset(
                UploadRequest::new(payload, "covers"),
                &UploadOptions::default(),
                &NoProgress,
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("https://cdn.test/covers/"));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_uploaded_routes_by_shape() {
        let (storage, client) = client();
        let options = UploadOptions::default();

        let url = client
            .ensure_uploaded("https://cdn.test/x.jpg", "covers", &options, &NoProgress)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.test/x.jpg");

        let url = client
            .ensure_uploaded("data:image/png;base64,aGVsbG8=", "covers", &options, &NoProgress)
            .await
            .unwrap();
        assert!(url.ends_with(".jpg"));
        assert_eq!(storage.len(), 1);

        let path = url.trim_start_matches("https://cdn.test/");
        let resolved = client
            .ensure_uploaded(&format!("gs://legacy/{}", path), "covers", &options, &NoProgress)
            .await
            .unwrap();
        assert_eq!(resolved, url);
    }

    #[tokio::test]
    async fn test_bad_data_url_is_invalid_payload() {
        let (_, client) = client();
        let err = client
            .ensure_uploaded("data:image/png;base64,@@@", "covers", &UploadOptions::default(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPayload { .. }));
    }
}
