use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Coarse phases of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStep {
    /// Served from the content cache
    Cache,
    /// Bytes are moving
    Upload,
    /// Minting the download URL
    ResolveUrl,
}

/// Subscriber for upload progress; the UI side implements this
pub trait ProgressObserver: Send + Sync {
    /// Percent complete, 0..=100
    fn on_progress(&self, percent: u8);

    fn on_step(&self, _step: UploadStep) {}
}

/// Observer that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _percent: u8) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

/// Event pushed by [`ChannelProgress`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Progress { percent: u8 },
    Step { step: UploadStep },
}

/// Observer that forwards into an unbounded channel, for event-stream consumers
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelProgress {
    fn on_progress(&self, percent: u8) {
        let _ = self.tx.send(ProgressEvent::Progress { percent });
    }

    fn on_step(&self, step: UploadStep) {
        let _ = self.tx.send(ProgressEvent::Step { step });
    }
}
