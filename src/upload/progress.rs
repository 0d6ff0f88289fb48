//! Progress notification sinks.
//!
//! The session calls `on_progress` synchronously after every acknowledged
//! chunk, and `on_status` on every status change while it runs. Reporters
//! must return promptly; they are notifications only and never decide
//! whether an upload has completed.

use crate::models::UploadStatus;
use tokio::sync::watch;

/// Observer for upload progress, supplied by the caller.
pub trait ProgressReporter: Send + Sync {
    /// `percent` is in 0..=100 and never decreases within one upload.
    fn on_progress(&self, percent: u8);

    fn on_status(&self, _status: UploadStatus) {}
}

/// Ignores all notifications.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn on_progress(&self, _percent: u8) {}
}

/// Adapts a closure.
pub struct FnProgress<F>(pub F);

impl<F> ProgressReporter for FnProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        (self.0)(percent)
    }
}

/// Publishes the latest percentage on a watch channel. Never blocks.
pub struct WatchProgress {
    tx: watch::Sender<u8>,
}

impl WatchProgress {
    pub fn new() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx }, rx)
    }
}

impl ProgressReporter for WatchProgress {
    fn on_progress(&self, percent: u8) {
        self.tx.send_replace(percent);
    }
}
