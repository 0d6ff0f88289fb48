//! Single byte-range transfers and status probes against a session URI.
//!
//! Stateless per call. Transient failures (timeouts, resets, 5xx) are
//! retried here with exponential backoff; everything else is classified
//! and handed back to the session, which decides whether to resync.

use crate::error::{NetworkError, ProtocolError};
use crate::models::UploadedVideo;
use crate::upload::protocol::{
    committed_from_range, content_range, is_transient_status, probe_content_range,
    RESUME_INCOMPLETE,
};
use crate::upload::retry::{retry_with_backoff, RetryAction, RetryError, RetryPolicy};
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use tokio_util::sync::CancellationToken;

/// Provider acknowledgment of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAck {
    /// Server now holds bytes `[0, n)`.
    Committed(u64),
    /// That was the last chunk; the video resource exists.
    Completed(UploadedVideo),
}

/// Answer to a zero-length status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Incomplete { committed: u64 },
    Completed(UploadedVideo),
}

/// Why a transfer did not produce an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransmitError {
    /// Transient failures, after retries ran out.
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// HTTP 401; the caller refreshes its token.
    #[error("Access token rejected")]
    Unauthorized,

    #[error("Transfer cancelled")]
    Cancelled,
}

impl From<RetryError<TransmitError>> for TransmitError {
    fn from(e: RetryError<TransmitError>) -> Self {
        match e {
            RetryError::Cancelled => TransmitError::Cancelled,
            RetryError::Failed(e) => e,
        }
    }
}

/// Sends chunks and probes with retry/backoff.
#[derive(Clone)]
pub struct ChunkTransmitter {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl ChunkTransmitter {
    /// `http` must not follow redirects: 308 is a protocol answer here.
    pub fn new(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// PUT `bytes` at `offset` with an explicit declared total.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_chunk(
        &self,
        session_uri: &str,
        offset: u64,
        bytes: Bytes,
        total: u64,
        content_type: &str,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<ChunkAck, TransmitError> {
        let window = offset..offset + bytes.len() as u64;
        let range_header = content_range(&window, total);
        let expected = window.end;

        let result = retry_with_backoff(&self.policy, cancel, |_| {
            let request = self
                .http
                .put(session_uri)
                .bearer_auth(access_token)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_RANGE, range_header.as_str())
                .body(bytes.clone());
            async move {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return RetryAction::Fail(TransmitError::Cancelled),
                    sent = request.send() => sent,
                };
                match sent {
                    Ok(response) => classify_chunk_response(response, expected).await,
                    Err(e) => RetryAction::Retry(NetworkError::from_reqwest(&e).into()),
                }
            }
        })
        .await;

        result.map_err(TransmitError::from)
    }

    /// Ask the server how many bytes it has committed.
    pub async fn probe(
        &self,
        session_uri: &str,
        total: u64,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<ProbeResult, TransmitError> {
        let range_header = probe_content_range(total);

        let result = retry_with_backoff(&self.policy, cancel, |_| {
            let request = self
                .http
                .put(session_uri)
                .bearer_auth(access_token)
                .header(CONTENT_LENGTH, "0")
                .header(CONTENT_RANGE, range_header.as_str())
                .body(Bytes::new());
            async move {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return RetryAction::Fail(TransmitError::Cancelled),
                    sent = request.send() => sent,
                };
                match sent {
                    Ok(response) => classify_probe_response(response).await,
                    Err(e) => RetryAction::Retry(NetworkError::from_reqwest(&e).into()),
                }
            }
        })
        .await;

        result.map_err(TransmitError::from)
    }
}

async fn classify_chunk_response(
    response: reqwest::Response,
    expected: u64,
) -> RetryAction<ChunkAck, TransmitError> {
    let status = response.status().as_u16();

    if response.status().is_success() {
        return match created_resource(response).await {
            Ok(video) => RetryAction::Success(ChunkAck::Completed(video)),
            Err(e) => RetryAction::Fail(e.into()),
        };
    }

    if status == RESUME_INCOMPLETE {
        return match committed_offset(&response) {
            Ok(committed) if committed == expected => {
                RetryAction::Success(ChunkAck::Committed(committed))
            }
            Ok(committed) => {
                RetryAction::Fail(ProtocolError::RangeMismatch { expected, committed }.into())
            }
            Err(e) => RetryAction::Fail(e.into()),
        };
    }

    classify_failure(response).await
}

async fn classify_probe_response(
    response: reqwest::Response,
) -> RetryAction<ProbeResult, TransmitError> {
    if response.status().is_success() {
        return match created_resource(response).await {
            Ok(video) => RetryAction::Success(ProbeResult::Completed(video)),
            Err(e) => RetryAction::Fail(e.into()),
        };
    }

    if response.status().as_u16() == RESUME_INCOMPLETE {
        return match committed_offset(&response) {
            Ok(committed) => RetryAction::Success(ProbeResult::Incomplete { committed }),
            Err(e) => RetryAction::Fail(e.into()),
        };
    }

    classify_failure(response).await
}

/// Shared handling for non-2xx, non-308 responses.
async fn classify_failure<T>(response: reqwest::Response) -> RetryAction<T, TransmitError> {
    let status = response.status().as_u16();
    if status == 401 {
        return RetryAction::Fail(TransmitError::Unauthorized);
    }
    if is_transient_status(status) {
        return RetryAction::Retry(NetworkError::ServerUnavailable(status).into());
    }
    let body = response.text().await.unwrap_or_default();
    RetryAction::Fail(ProtocolError::UnexpectedStatus { status, body }.into())
}

fn committed_offset(response: &reqwest::Response) -> Result<u64, ProtocolError> {
    let header = match response.headers().get(RANGE) {
        Some(value) => Some(value.to_str().map_err(|_| {
            ProtocolError::MalformedResponse("non-ASCII Range header".to_string())
        })?),
        None => None,
    };
    committed_from_range(header).ok_or_else(|| {
        ProtocolError::MalformedResponse(format!("unparseable Range header {:?}", header))
    })
}

async fn created_resource(response: reqwest::Response) -> Result<UploadedVideo, ProtocolError> {
    response
        .json::<UploadedVideo>()
        .await
        .map_err(|e| ProtocolError::MalformedResponse(format!("created resource: {}", e)))
}

impl From<TransmitError> for crate::error::UploadError {
    fn from(e: TransmitError) -> Self {
        use crate::error::{AuthError, UploadError};
        match e {
            TransmitError::Network(e) => UploadError::Network(e),
            TransmitError::Protocol(e) => UploadError::Protocol(e),
            TransmitError::Unauthorized => UploadError::Auth(AuthError::TokenRejected),
            TransmitError::Cancelled => UploadError::Aborted,
        }
    }
}
