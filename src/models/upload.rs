//! Upload session state as seen by callers.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Resumable upload state machine.
///
/// `Initiated → Uploading → {Resyncing ⇄ Uploading} → Completed`, and any
/// non-terminal state may end in `Failed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initiated,
    Uploading,
    Resyncing,
    Completed,
    Failed,
    Aborted,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Aborted
        )
    }
}

/// Point-in-time view of an upload, kept readable after it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    pub status: UploadStatus,
    pub bytes_confirmed: u64,
    pub total_bytes: u64,
}

impl UploadSnapshot {
    /// Whole-number percentage of bytes the provider has acknowledged.
    pub fn percent(&self) -> u8 {
        percent_of(self.bytes_confirmed, self.total_bytes)
    }
}

/// What the HTTP API reports about a background upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UploadJobView {
    pub id: String,
    pub status: UploadStatus,
    /// Advisory; completion is signalled by `status` and `video_id`.
    pub percent: u8,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

/// `done / total` as 0..=100. An empty total counts as done.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u128::from(done.min(total)) * 100) / u128::from(total);
    pct as u8
}
