use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    BatchId, NoProgress, ProgressObserver, UploadError, UploadOptions, UploadRequest,
    UploadResult,
};

/// Anything that can take a single request to a URL
#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn upload_asset(
        &self,
        request: UploadRequest,
        options: &UploadOptions,
        progress: &dyn ProgressObserver,
    ) -> UploadResult<String>;
}

/// One entry of a batch, tagged with the caller's key (`photo`, `step_0`, ...)
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub key: String,
    pub request: UploadRequest,
}

impl BatchItem {
    pub fn new<S: Into<String>>(key: S, request: UploadRequest) -> Self {
        Self {
            key: key.into(),
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "key", rename_all = "snake_case")]
pub enum BatchPhase {
    Preparing,
    Uploading(String),
    Done,
    Failed,
}

/// Aggregate state of a running batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub id: BatchId,
    pub per_item_percent: BTreeMap<String, u8>,
    pub done: usize,
    pub total: usize,
    pub phase: BatchPhase,
}

impl BatchJob {
    pub fn new<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut per_item_percent = BTreeMap::new();
        let mut total = 0;
        for key in keys {
            per_item_percent.insert(key.to_string(), 0);
            total += 1;
        }
        Self {
            id: BatchId::new(),
            per_item_percent,
            done: 0,
            total,
            phase: BatchPhase::Preparing,
        }
    }

    /// Mean of the per-item percentages
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let sum: usize = self.per_item_percent.values().map(|p| *p as usize).sum();
        (sum / self.per_item_percent.len().max(1)).min(100) as u8
    }

    fn set_progress(&mut self, key: &str, percent: u8) {
        self.per_item_percent.insert(key.to_string(), percent.min(100));
    }

    fn complete_item(&mut self, key: &str) {
        self.set_progress(key, 100);
        self.done = (self.done + 1).min(self.total);
    }
}

/// Receives a snapshot of the batch after every change
pub trait BatchObserver: Send + Sync {
    fn on_update(&self, job: &BatchJob);
}

impl BatchObserver for NoProgress {
    fn on_update(&self, _job: &BatchJob) {}
}

impl<F> BatchObserver for F
where
    F: Fn(&BatchJob) + Send + Sync,
{
    fn on_update(&self, job: &BatchJob) {
        self(job)
    }
}

/// Every item resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSuccess {
    pub urls: Vec<String>,
    pub done: usize,
    pub total: usize,
}

/// The batch stopped at `failed_at` (0-based); later items were never tried
#[derive(Debug, Error)]
#[error("batch item {failed_at} ({key}) failed after {done}/{total} uploads: {error}")]
pub struct BatchFailure {
    pub urls: Vec<String>,
    pub done: usize,
    pub total: usize,
    pub failed_at: usize,
    pub key: String,
    #[source]
    pub error: UploadError,
}

/// Forwards one item's ticks into the shared job
struct ItemProgress<'a> {
    key: &'a str,
    job: &'a Mutex<BatchJob>,
    observer: &'a dyn BatchObserver,
}

impl ProgressObserver for ItemProgress<'_> {
    fn on_progress(&self, percent: u8) {
        let snapshot = {
            let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
            job.set_progress(self.key, percent);
            job.clone()
        };
        self.observer.on_update(&snapshot);
    }
}

/// Uploads batch items strictly one after another and fails fast
pub struct BatchCoordinator<'a, U: AssetUploader + ?Sized> {
    uploader: &'a U,
}

impl<'a, U: AssetUploader + ?Sized> BatchCoordinator<'a, U> {
    pub fn new(uploader: &'a U) -> Self {
        Self { uploader }
    }

    pub async fn run(
        &self,
        items: Vec<BatchItem>,
        options: &UploadOptions,
        observer: &dyn BatchObserver,
    ) -> Result<BatchSuccess, BatchFailure> {
        // Progress is tracked per key, so keys must be unique
        let mut seen = HashSet::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if !seen.insert(item.key.as_str()) {
                warn!(index, key = %item.key, "duplicate batch key");
                return Err(BatchFailure {
                    urls: Vec::new(),
                    done: 0,
                    total: items.len(),
                    failed_at: index,
                    key: item.key.clone(),
                    error: UploadError::invalid(format!("duplicate batch key {:?}", item.key)),
                });
            }
        }

        let job = Mutex::new(BatchJob::new(items.iter().map(|i| i.key.as_str())));
        let total = items.len();
        let mut urls = Vec::with_capacity(total);

        let batch_id = self.snapshot(&job, observer, |_| {}).id;
        debug!(batch_id = %batch_id, total, "batch started");

        for (index, item) in items.into_iter().enumerate() {
            let BatchItem { key, request } = item;

            let result = if options.cancel.is_cancelled() {
                Err(UploadError::Cancelled)
            } else {
                self.snapshot(&job, observer, |j| j.phase = BatchPhase::Uploading(key.clone()));
                let progress = ItemProgress {
                    key: &key,
                    job: &job,
                    observer,
                };
                self.uploader.upload_asset(request, options, &progress).await
            };

            match result {
                Ok(url) => {
                    urls.push(url);
                    self.snapshot(&job, observer, |j| j.complete_item(&key));
                }
                Err(error) => {
                    let snapshot = self.snapshot(&job, observer, |j| j.phase = BatchPhase::Failed);
                    warn!(
                        batch_id = %batch_id,
                        index,
                        key = %key,
                        done = snapshot.done,
                        error = %error,
                        "batch aborted"
                    );
                    return Err(BatchFailure {
                        urls,
                        done: snapshot.done,
                        total,
                        failed_at: index,
                        key,
                        error,
                    });
                }
            }
        }

        let snapshot = self.snapshot(&job, observer, |j| j.phase = BatchPhase::Done);
        info!(batch_id = %batch_id, total, "batch completed");
        Ok(BatchSuccess {
            urls,
            done: snapshot.done,
            total,
        })
    }

    fn snapshot<F>(&self, job: &Mutex<BatchJob>, observer: &dyn BatchObserver, update: F) -> BatchJob
    where
        F: FnOnce(&mut BatchJob),
    {
        let snapshot = {
            let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
            update(&mut job);
            job.clone()
        };
        observer.on_update(&snapshot);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailAt {
        fail_index: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetUploader for FailAt {
        async fn upload_asset(
            &self,
            request: UploadRequest,
            _options: &UploadOptions,
            progress: &dyn ProgressObserver,
        ) -> UploadResult<String> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            progress.on_progress(50);
            if Some(index) == self.fail_index {
                return Err(UploadError::Cancelled);
            }
            Ok(format!("https://cdn.test/{}", request.destination()))
        }
    }

    fn items(n: usize) -> Vec<BatchItem> {
        (0..n)
            .map(|i| {
                let payload = Payload::from_bytes(vec![i as u8; 8]).with_content_type("image/jpeg");
                BatchItem::new(format!("step_{}", i), UploadRequest::new(payload, format!("f{}", i)))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_items_in_order() {
        let uploader = FailAt {
            fail_index: None,
            calls: AtomicUsize::new(0),
        };
        let snapshots = Mutex::new(Vec::new());
        let observer = |job: &BatchJob| snapshots.lock().unwrap().push(job.clone());

        let ok = BatchCoordinator::new(&uploader)
            .run(items(3), &UploadOptions::default(), &observer)
            .await
            .unwrap();

        assert_eq!(ok.urls, vec!["https://cdn.test/f0", "https://cdn.test/f1", "https://cdn.test/f2"]);
        assert_eq!((ok.done, ok.total), (3, 3));

        let snapshots = snapshots.into_inner().unwrap();
        assert_eq!(snapshots.first().unwrap().phase, BatchPhase::Preparing);
        assert_eq!(snapshots.last().unwrap().phase, BatchPhase::Done);
        assert_eq!(snapshots.last().unwrap().percent(), 100);

        let mut last_done = 0;
        for s in &snapshots {
            assert!(s.done >= last_done && s.done <= s.total);
            last_done = s.done;
        }
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_partial_urls() {
        let uploader = FailAt {
            fail_index: Some(1),
            calls: AtomicUsize::new(0),
        };

        let failure = BatchCoordinator::new(&uploader)
            .run(items(4), &UploadOptions::default(), &NoProgress)
            .await
            .unwrap_err();

        assert_eq!(failure.failed_at, 1);
        assert_eq!(failure.key, "step_1");
        assert_eq!(failure.done, 1);
        assert_eq!(failure.urls.len(), 1);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_batch_attempts_nothing() {
        let uploader = FailAt {
            fail_index: None,
            calls: AtomicUsize::new(0),
        };
        let options = UploadOptions::default();
        options.cancel.cancel();

        let failure = BatchCoordinator::new(&uploader)
            .run(items(2), &options, &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, UploadError::Cancelled));
        assert_eq!(failure.failed_at, 0);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_phase_wire_shape() {
        let json = serde_json::to_value(BatchPhase::Uploading("photo".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "phase": "uploading", "key": "photo" }));
    }

    #[tokio::test]
    async fn test_duplicate_keys_rejected_before_upload() {
        let uploader = FailAt {
            fail_index: None,
            calls: AtomicUsize::new(0),
        };
        let mut batch = items(3);
        batch[2].key = "step_0".to_string();

        let failure = BatchCoordinator::new(&uploader)
            .run(batch, &UploadOptions::default(), &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, UploadError::Invalid { .. }));
        assert_eq!(failure.failed_at, 2);
        assert_eq!(failure.key, "step_0");
        assert_eq!((failure.done, failure.total), (0, 3));
        assert!(failure.urls.is_empty());
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }
}
