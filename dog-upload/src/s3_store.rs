use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    ObjectMetadata, ObjectStorage, PutAck, StoreCapabilities, TickSender, TransferTick,
    UploadConfig, UploadError, UploadResult,
};

/// S3 refuses multipart parts smaller than this, except the last one
const MIN_PART_BYTES: u64 = 5 * 1024 * 1024;

/// S3-compatible store settings
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub part_bytes: u64,
    pub download_url_ttl: Duration,
}

impl S3Config {
    /// Read `S3_REGION`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY` and the
    /// optional `S3_ENDPOINT_URL`
    pub fn from_env<S: Into<String>>(bucket: S) -> UploadResult<Self> {
        Self::from_lookup(bucket, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<S, F>(bucket: S, lookup: F) -> UploadResult<Self>
    where
        S: Into<String>,
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| UploadError::invalid(format!("{} environment variable required", key)))
        };

        Ok(Self {
            bucket: bucket.into(),
            region: required("S3_REGION")?,
            access_key_id: required("S3_ACCESS_KEY_ID")?,
            secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
            endpoint_url: lookup("S3_ENDPOINT_URL").filter(|v| !v.is_empty()),
            part_bytes: MIN_PART_BYTES,
            download_url_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        })
    }

    /// Take part size and URL lifetime from an upload config
    pub fn with_upload_config(mut self, config: &UploadConfig) -> Self {
        self.part_bytes = config.resumable_chunk_bytes;
        self.download_url_ttl = config.download_url_ttl;
        self
    }

    pub fn with_part_bytes(mut self, part_bytes: u64) -> Self {
        self.part_bytes = part_bytes;
        self
    }

    pub fn with_download_url_ttl(mut self, ttl: Duration) -> Self {
        self.download_url_ttl = ttl;
        self
    }

    /// Part size actually used, never below the service minimum
    pub fn effective_part_bytes(&self) -> u64 {
        self.part_bytes.max(MIN_PART_BYTES)
    }
}

/// Object storage backed by any S3-compatible service
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    part_bytes: u64,
    download_url_ttl: Duration,
}

impl S3ObjectStorage {
    pub async fn new(config: S3Config) -> Self {
        let part_bytes = config.effective_part_bytes();
        let download_url_ttl = config.download_url_ttl;
        let bucket = config.bucket.clone();
        let client = Self::create_client(config).await;

        Self {
            client,
            bucket,
            part_bytes,
            download_url_ttl,
        }
    }

    pub async fn from_env<S: Into<String>>(bucket: S) -> UploadResult<Self> {
        Ok(Self::new(S3Config::from_env(bucket)?).await)
    }

    async fn create_client(config: S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "dog-upload",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);
        let path_style = config.endpoint_url.is_some();
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(path_style)
                .build(),
        )
    }

    fn map_aws_error(err: impl std::error::Error + Send + Sync + 'static) -> UploadError {
        UploadError::backend(err)
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        body: &Bytes,
        ticks: &TickSender,
        cancel: &CancellationToken,
    ) -> UploadResult<Vec<CompletedPart>> {
        let total = body.len() as u64;
        let mut parts = Vec::new();

        for (index, range) in part_ranges(body.len(), self.part_bytes as usize)
            .into_iter()
            .enumerate()
        {
            let part_number = index as i32 + 1;
            let end = range.end;
            let chunk = body.slice(range);

            let request = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(AwsByteStream::from(chunk))
                .send();

            let output = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                res = request => res.map_err(Self::map_aws_error)?,
            };

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            let _ = ticks.send(TransferTick::new(end as u64, total));
        }

        Ok(parts)
    }

    async fn abort(&self, path: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = result {
            warn!(path = %path, upload_id = %upload_id, error = %e, "failed to abort multipart upload");
        }
    }
}

/// Byte ranges of the parts for a payload of `len` bytes; empty for an empty payload
fn part_ranges(len: usize, part_bytes: usize) -> Vec<Range<usize>> {
    let part_bytes = part_bytes.max(1);
    (0..len)
        .step_by(part_bytes)
        .map(|start| start..(start + part_bytes).min(len))
        .collect()
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> UploadResult<PutAck> {
        let size = body.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(&metadata.content_type)
            .body(AwsByteStream::from(body));

        for (key, value) in &metadata.custom {
            request = request.metadata(key, value);
        }

        let result = request.send().await.map_err(Self::map_aws_error)?;

        let mut ack = PutAck::new(size);
        if let Some(etag) = result.e_tag {
            ack = ack.with_etag(etag);
        }
        Ok(ack)
    }

    async fn put_resumable(
        &self,
        path: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
        ticks: TickSender,
        cancel: CancellationToken,
    ) -> UploadResult<PutAck> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        // A multipart upload needs at least one part
        if body.is_empty() {
            let ack = self.put(path, body, metadata).await?;
            let _ = ticks.send(TransferTick::new(0, 0));
            return Ok(ack);
        }

        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(&metadata.content_type);
        for (key, value) in &metadata.custom {
            create = create.metadata(key, value);
        }

        let created = create.send().await.map_err(Self::map_aws_error)?;
        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::invalid("multipart upload id missing"))?;

        debug!(path = %path, upload_id = %upload_id, "multipart upload started");

        let parts = match self
            .upload_parts(path, &upload_id, &body, &ticks, &cancel)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort(path, &upload_id).await;
                return Err(e);
            }
        };

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;

        match completed {
            Ok(output) => {
                let mut ack = PutAck::new(body.len() as u64);
                if let Some(etag) = output.e_tag {
                    ack = ack.with_etag(etag);
                }
                Ok(ack)
            }
            Err(e) => {
                self.abort(path, &upload_id).await;
                Err(Self::map_aws_error(e))
            }
        }
    }

    async fn resolve_download_url(&self, path: &str) -> UploadResult<String> {
        let presigning =
            PresigningConfig::expires_in(self.download_url_ttl).map_err(Self::map_aws_error)?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(Self::map_aws_error)?;

        Ok(request.uri().to_string())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_resumable().with_signed_urls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_requires_credentials() {
        let err = S3Config::from_lookup("media", lookup(&[("S3_REGION", "us-east-1")])).unwrap_err();
        assert!(err.to_string().contains("S3_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_part_size_has_floor() {
        let config = S3Config::from_lookup(
            "media",
            lookup(&[
                ("S3_REGION", "us-east-1"),
                ("S3_ACCESS_KEY_ID", "id"),
                ("S3_SECRET_ACCESS_KEY", "secret"),
                ("S3_ENDPOINT_URL", "http://localhost:9000"),
            ]),
        )
        .unwrap()
        .with_upload_config(&UploadConfig::default());

        assert_eq!(config.effective_part_bytes(), MIN_PART_BYTES);
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_empty_payload_has_no_parts() {
        assert!(part_ranges(0, MIN_PART_BYTES as usize).is_empty());
    }

    #[test]
    fn test_part_ranges_cover_payload() {
        let part = MIN_PART_BYTES as usize;
        assert_eq!(part_ranges(1, part), vec![0..1]);
        assert_eq!(part_ranges(part, part), vec![0..part]);
        assert_eq!(
            part_ranges(2 * part + 7, part),
            vec![0..part, part..2 * part, 2 * part..2 * part + 7]
        );
    }
}
