// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Background upload jobs behind the HTTP API.
//!
//! A request body is spooled to disk, the resumable session is opened while
//! the client waits, and the chunk transfer then runs on its own task. Job
//! state stays queryable for a while after the transfer ends.

use crate::error::{UploadError, ValidationError};
use crate::models::{UploadJobView, UploadStatus, VideoMetadata};
use crate::services::token::TokenRefresher;
use crate::time_utils::format_utc_rfc3339;
use crate::upload::{AbortHandle, FileSource, MediaSource, ProgressReporter, Uploader};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Finished jobs are forgotten after this long.
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;

/// Mirrors a running session into its job's view.
struct ViewReporter(Arc<watch::Sender<UploadJobView>>);

impl ProgressReporter for ViewReporter {
    fn on_progress(&self, percent: u8) {
        self.0.send_modify(|v| v.percent = percent);
    }

    fn on_status(&self, status: UploadStatus) {
        self.0.send_modify(|v| v.status = status);
    }
}

struct UploadJob {
    owner: String,
    view: Arc<watch::Sender<UploadJobView>>,
    abort: AbortHandle,
    finished_at: Arc<std::sync::OnceLock<DateTime<Utc>>>,
}

/// Registry of running and recently finished uploads.
pub struct UploadJobs {
    uploader: Arc<Uploader>,
    jobs: DashMap<Uuid, UploadJob>,
    retention: Duration,
}

impl UploadJobs {
    pub fn new(uploader: Arc<Uploader>) -> Self {
        Self {
            uploader,
            jobs: DashMap::new(),
            retention: Duration::minutes(FINISHED_JOB_RETENTION_MINUTES),
        }
    }

    /// How long a finished job stays queryable.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Write a request body to the spool directory. Returns the path and
    /// the number of bytes written.
    pub async fn spool<S, E>(&self, id: Uuid, mut body: S) -> Result<(PathBuf, u64), UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let dir = &self.uploader.settings().spool_dir;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.upload", id));

        let mut file = tokio::fs::File::create(&path).await?;
        let result = write_body(&mut file, &mut body).await;
        drop(file);

        match result {
            Ok(written) => {
                tracing::debug!(upload_id = %id, bytes = written, "Request body spooled");
                Ok((path, written))
            }
            Err(e) => {
                tracing::warn!(upload_id = %id, error = %e, "Spooling request body failed");
                remove_spool(&path).await;
                Err(e.into())
            }
        }
    }

    /// Open a session for a spooled file and start transferring it.
    ///
    /// Returns once the provider has issued a session URI. The job is
    /// registered before initiation, so `abort_all` also stops a session
    /// that is still being opened. The spool file is removed when the job
    /// ends, whatever the outcome.
    pub async fn submit(
        &self,
        id: Uuid,
        tokens: Arc<TokenRefresher>,
        metadata: VideoMetadata,
        spool_path: PathBuf,
        content_type: &str,
    ) -> Result<UploadJobView, UploadError> {
        self.prune_finished();

        let source = match FileSource::open(&spool_path, content_type).await {
            Ok(source) if source.is_empty() => {
                remove_spool(&spool_path).await;
                return Err(ValidationError::MissingFile.into());
            }
            Ok(source) => Arc::new(source),
            Err(e) => {
                remove_spool(&spool_path).await;
                return Err(e.into());
            }
        };

        let owner = tokens.subject_id().to_string();
        let initial = UploadJobView {
            id: id.to_string(),
            status: UploadStatus::Initiated,
            percent: 0,
            total_bytes: source.len(),
            video_id: None,
            watch_url: None,
            error: None,
            error_kind: None,
            created_at: format_utc_rfc3339(Utc::now()),
            finished_at: None,
        };
        let view = Arc::new(watch::Sender::new(initial.clone()));
        let finished_at = Arc::new(std::sync::OnceLock::new());
        let cancel = CancellationToken::new();

        self.jobs.insert(
            id,
            UploadJob {
                owner: owner.clone(),
                view: view.clone(),
                abort: AbortHandle::new(cancel.clone()),
                finished_at: finished_at.clone(),
            },
        );

        let mut session = match self
            .uploader
            .start_with_cancel(tokens, &metadata, source, cancel)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.jobs.remove(&id);
                remove_spool(&spool_path).await;
                return Err(e);
            }
        };

        tracing::info!(
            upload_id = %id,
            subject_id = %owner,
            title = %metadata.title,
            total_bytes = initial.total_bytes,
            "Upload job started"
        );

        tokio::spawn(async move {
            let reporter = ViewReporter(view.clone());
            let result = session.run(&reporter).await;
            let now = Utc::now();
            let _ = finished_at.set(now);

            view.send_modify(|v| {
                v.status = session.status();
                v.finished_at = Some(format_utc_rfc3339(now));
                match &result {
                    Ok(video) => {
                        v.percent = 100;
                        v.video_id = Some(video.id.clone());
                        v.watch_url = Some(video.watch_url());
                    }
                    Err(e) => {
                        v.error = Some(e.to_string());
                        v.error_kind = Some(e.kind().to_string());
                    }
                }
            });

            match &result {
                Ok(video) => {
                    tracing::info!(upload_id = %id, video_id = %video.id, "Upload job completed")
                }
                Err(e) => {
                    tracing::warn!(upload_id = %id, error = %e, kind = e.kind(), "Upload job ended without a video")
                }
            }
            remove_spool(&spool_path).await;
        });

        Ok(initial)
    }

    /// Current state of a job owned by `owner`.
    pub fn get(&self, id: Uuid, owner: &str) -> Option<UploadJobView> {
        self.prune_finished();
        let job = self.jobs.get(&id)?;
        if job.owner != owner {
            return None;
        }
        let view = job.view.borrow().clone();
        Some(view)
    }

    /// Request cancellation. The job reports `aborted` once its task stops.
    pub fn abort(&self, id: Uuid, owner: &str) -> Option<UploadJobView> {
        let job = self.jobs.get(&id)?;
        if job.owner != owner {
            return None;
        }
        if !job.view.borrow().status.is_terminal() {
            tracing::info!(upload_id = %id, "Abort requested");
            job.abort.abort();
        }
        let view = job.view.borrow().clone();
        Some(view)
    }

    /// Jobs owned by `owner`, newest first.
    pub fn list(&self, owner: &str) -> Vec<UploadJobView> {
        self.prune_finished();
        let mut views: Vec<UploadJobView> = self
            .jobs
            .iter()
            .filter(|job| job.owner == owner)
            .map(|job| job.view.borrow().clone())
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// Jobs whose transfer has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.prune_finished();
        self.jobs
            .iter()
            .filter(|job| !job.view.borrow().status.is_terminal())
            .count()
    }

    /// Abort every job owned by `owner` (sign-out).
    pub fn abort_all(&self, owner: &str) {
        for job in self.jobs.iter().filter(|job| job.owner == owner) {
            job.abort.abort();
        }
    }

    fn prune_finished(&self) {
        let cutoff = Utc::now() - self.retention;
        self.jobs
            .retain(|_, job| !matches!(job.finished_at.get(), Some(at) if *at <= cutoff));
    }
}

/// Copy `body` into `out` and flush. Returns the byte count.
async fn write_body<W, S, E>(out: &mut W, body: &mut S) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| std::io::Error::other(format!("request body: {}", e)))?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

async fn remove_spool(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove spool file");
        }
    }
}
