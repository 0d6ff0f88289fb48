// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Resumable upload sessions.
//!
//! `Uploader::start` validates input and opens a session with the provider.
//! `UploadSession::run` then streams chunks, resynchronising with the
//! server's view of committed bytes whenever a chunk cannot be confirmed.

use crate::config::{ProviderEndpoints, UploadSettings};
use crate::error::{AuthError, NetworkError, ProtocolError, UploadError, ValidationError};
use crate::models::upload::percent_of;
use crate::models::{UploadSnapshot, UploadStatus, UploadedVideo, VideoMetadata};
use crate::services::token::TokenRefresher;
use crate::upload::progress::ProgressReporter;
use crate::upload::protocol::{chunk_window, is_transient_status, LOCATION};
use crate::upload::retry::{retry_with_backoff, RetryAction, RetryError, RetryPolicy};
use crate::upload::source::MediaSource;
use crate::upload::transmitter::{ChunkAck, ChunkTransmitter, ProbeResult, TransmitError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens upload sessions. One per process; cheap to share.
pub struct Uploader {
    http: reqwest::Client,
    upload_url: String,
    settings: UploadSettings,
    transmitter: ChunkTransmitter,
}

impl Uploader {
    pub fn new(endpoints: &ProviderEndpoints, settings: UploadSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let policy = RetryPolicy::from_settings(&settings);

        Ok(Self {
            transmitter: ChunkTransmitter::new(http.clone(), policy),
            http,
            upload_url: format!(
                "{}/upload/youtube/v3/videos",
                endpoints.upload_base.trim_end_matches('/')
            ),
            settings,
        })
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Validate `metadata` and `source`, then open a resumable session.
    ///
    /// Validation failures return before any network request is made.
    pub async fn start(
        &self,
        tokens: Arc<TokenRefresher>,
        metadata: &VideoMetadata,
        source: Arc<dyn MediaSource>,
    ) -> Result<UploadSession, UploadError> {
        self.start_with_cancel(tokens, metadata, source, CancellationToken::new())
            .await
    }

    /// As `start`, with a caller-owned cancellation token that also covers
    /// the initiation request.
    pub async fn start_with_cancel(
        &self,
        tokens: Arc<TokenRefresher>,
        metadata: &VideoMetadata,
        source: Arc<dyn MediaSource>,
        cancel: CancellationToken,
    ) -> Result<UploadSession, UploadError> {
        if source.is_empty() {
            return Err(ValidationError::MissingFile.into());
        }
        metadata.check()?;

        let session_uri = self
            .initiate(&tokens, metadata, source.as_ref(), &cancel)
            .await?;

        info!(
            subject_id = %tokens.subject_id(),
            total_bytes = source.len(),
            chunk_size = self.settings.chunk_size,
            "Upload session initiated"
        );

        Ok(UploadSession {
            session_uri,
            total_bytes: source.len(),
            bytes_confirmed: 0,
            status: UploadStatus::Initiated,
            chunk_size: self.settings.chunk_size,
            max_resyncs: self.settings.max_resyncs,
            resyncs_without_progress: 0,
            reported_percent: 0,
            source,
            tokens,
            transmitter: self.transmitter.clone(),
            cancel,
        })
    }

    /// POST the metadata and obtain the session URI.
    async fn initiate(
        &self,
        tokens: &TokenRefresher,
        metadata: &VideoMetadata,
        source: &dyn MediaSource,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let resource = metadata.to_resource();
        let total = source.len().to_string();
        let mut credential = tokens.get_valid_token().await?;
        let mut refreshed = false;

        loop {
            let result = retry_with_backoff(self.transmitter.policy(), cancel, |_| {
                let request = self
                    .http
                    .post(&self.upload_url)
                    .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
                    .bearer_auth(&credential.access_token)
                    .header("X-Upload-Content-Length", total.as_str())
                    .header("X-Upload-Content-Type", source.content_type())
                    .json(&resource);
                async move {
                    match request.send().await {
                        Ok(response) => classify_initiation(response).await,
                        Err(e) => RetryAction::Retry(NetworkError::from_reqwest(&e).into()),
                    }
                }
            })
            .await;

            match result {
                Ok(uri) => return Ok(uri),
                Err(RetryError::Cancelled) => return Err(UploadError::Aborted),
                Err(RetryError::Failed(TransmitError::Unauthorized)) if !refreshed => {
                    refreshed = true;
                    credential = tokens.refresh_if_current(&credential.access_token).await?;
                }
                Err(RetryError::Failed(e)) => return Err(e.into()),
            }
        }
    }
}

async fn classify_initiation(response: reqwest::Response) -> RetryAction<String, TransmitError> {
    let status = response.status().as_u16();

    if response.status().is_success() {
        return match response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(uri) if !uri.is_empty() => RetryAction::Success(uri.to_string()),
            _ => RetryAction::Fail(ProtocolError::MissingSessionUri.into()),
        };
    }
    if status == 401 {
        return RetryAction::Fail(TransmitError::Unauthorized);
    }
    if is_transient_status(status) {
        return RetryAction::Retry(NetworkError::ServerUnavailable(status).into());
    }

    let body = response.text().await.unwrap_or_default();
    RetryAction::Fail(ProtocolError::UnexpectedStatus { status, body }.into())
}

/// Cancels a running session from another task.
#[derive(Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    /// Wrap the token later passed to `Uploader::start_with_cancel`.
    pub fn new(token: CancellationToken) -> Self {
        Self(token)
    }

    pub fn abort(&self) {
        self.0.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// One resumable transfer, owned by the task driving it.
pub struct UploadSession {
    session_uri: String,
    total_bytes: u64,
    /// Bytes the server has acknowledged, as last reported by the server.
    bytes_confirmed: u64,
    status: UploadStatus,
    chunk_size: u64,
    max_resyncs: u32,
    resyncs_without_progress: u32,
    reported_percent: u8,
    source: Arc<dyn MediaSource>,
    tokens: Arc<TokenRefresher>,
    transmitter: ChunkTransmitter,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn session_uri(&self) -> &str {
        &self.session_uri
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn bytes_confirmed(&self) -> u64 {
        self.bytes_confirmed
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            status: self.status,
            bytes_confirmed: self.bytes_confirmed,
            total_bytes: self.total_bytes,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.cancel.clone())
    }

    /// Stop the session. No-op once it has finished.
    pub fn abort(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.cancel.cancel();
        self.status = UploadStatus::Aborted;
        info!(session_uri = %self.session_uri, "Upload aborted");
    }

    /// Transfer the remaining bytes. Returns the created video only after
    /// the provider has confirmed the final byte.
    pub async fn run(
        &mut self,
        reporter: &dyn ProgressReporter,
    ) -> Result<UploadedVideo, UploadError> {
        if self.status.is_terminal() {
            return Err(match self.status {
                UploadStatus::Aborted => UploadError::Aborted,
                _ => UploadError::AlreadyFinished,
            });
        }

        let result = self.drive(reporter).await;
        match &result {
            Ok(video) => {
                self.transition(UploadStatus::Completed, reporter);
                info!(
                    video_id = %video.id,
                    total_bytes = self.total_bytes,
                    "Upload completed"
                );
            }
            Err(UploadError::Aborted) => {
                self.transition(UploadStatus::Aborted, reporter);
                info!(bytes_confirmed = self.bytes_confirmed, "Upload aborted");
            }
            Err(e) => {
                self.transition(UploadStatus::Failed, reporter);
                warn!(
                    error = %e,
                    bytes_confirmed = self.bytes_confirmed,
                    total_bytes = self.total_bytes,
                    "Upload failed"
                );
            }
        }
        result
    }

    async fn drive(&mut self, reporter: &dyn ProgressReporter) -> Result<UploadedVideo, UploadError> {
        // One token refresh per chunk after a 401.
        let mut reauthorized = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Aborted);
            }

            if self.status == UploadStatus::Resyncing {
                if let Some(video) = self.resync(reporter).await? {
                    return Ok(video);
                }
                continue;
            }

            // Everything acknowledged but no resource yet: ask for it.
            if self.bytes_confirmed >= self.total_bytes {
                self.transition(UploadStatus::Resyncing, reporter);
                continue;
            }

            let window = chunk_window(self.bytes_confirmed, self.chunk_size, self.total_bytes);
            let data = self.source.read_range(window.clone()).await?;
            let credential = self.tokens.get_valid_token().await?;
            self.transition(UploadStatus::Uploading, reporter);

            debug!(start = window.start, end = window.end, total = self.total_bytes, "Sending chunk");
            let ack = self
                .transmitter
                .send_chunk(
                    &self.session_uri,
                    window.start,
                    data,
                    self.total_bytes,
                    self.source.content_type(),
                    &credential.access_token,
                    &self.cancel,
                )
                .await;

            match ack {
                Ok(ChunkAck::Committed(committed)) => {
                    self.acknowledge(committed, reporter);
                    self.resyncs_without_progress = 0;
                    reauthorized = false;
                }
                Ok(ChunkAck::Completed(video)) => {
                    self.acknowledge(self.total_bytes, reporter);
                    return Ok(video);
                }
                Err(TransmitError::Unauthorized) if !reauthorized => {
                    reauthorized = true;
                    self.tokens
                        .refresh_if_current(&credential.access_token)
                        .await?;
                }
                Err(TransmitError::Unauthorized) => {
                    return Err(AuthError::TokenRejected.into());
                }
                Err(TransmitError::Cancelled) => return Err(UploadError::Aborted),
                Err(e @ (TransmitError::Network(_) | TransmitError::Protocol(_))) => {
                    warn!(
                        offset = window.start,
                        error = %e,
                        "Chunk not confirmed, resyncing with server"
                    );
                    self.transition(UploadStatus::Resyncing, reporter);
                }
            }
        }
    }

    /// Probe the server and adopt its committed offset. Returns the video
    /// if the server reports the upload as already complete.
    async fn resync(
        &mut self,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<UploadedVideo>, UploadError> {
        if self.resyncs_without_progress >= self.max_resyncs {
            return Err(UploadError::ResyncExhausted {
                attempts: self.resyncs_without_progress,
                committed: self.bytes_confirmed,
            });
        }
        self.resyncs_without_progress += 1;

        let credential = self.tokens.get_valid_token().await?;
        let probe = self
            .transmitter
            .probe(
                &self.session_uri,
                self.total_bytes,
                &credential.access_token,
                &self.cancel,
            )
            .await;

        match probe {
            Ok(ProbeResult::Completed(video)) => {
                self.acknowledge(self.total_bytes, reporter);
                Ok(Some(video))
            }
            Ok(ProbeResult::Incomplete { committed }) => {
                let committed = committed.min(self.total_bytes);
                info!(
                    client_offset = self.bytes_confirmed,
                    server_offset = committed,
                    "Resynced with server"
                );
                if committed > self.bytes_confirmed {
                    self.resyncs_without_progress = 0;
                }
                // The server is authoritative, even when it holds less.
                self.bytes_confirmed = committed;
                self.transition(UploadStatus::Uploading, reporter);
                Ok(None)
            }
            Err(TransmitError::Unauthorized) => {
                self.tokens
                    .refresh_if_current(&credential.access_token)
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(&mut self, status: UploadStatus, reporter: &dyn ProgressReporter) {
        if self.status != status {
            self.status = status;
            reporter.on_status(status);
        }
    }

    fn acknowledge(&mut self, committed: u64, reporter: &dyn ProgressReporter) {
        self.bytes_confirmed = committed.min(self.total_bytes);
        let percent = percent_of(self.bytes_confirmed, self.total_bytes);
        self.reported_percent = self.reported_percent.max(percent);
        reporter.on_progress(self.reported_percent);
    }
}
