// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error taxonomy for the credential and upload core, plus the HTTP-facing
//! application error with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authorization failures. Fatal for the current session: the user has to
/// go through interactive sign-in again. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No credential stored for subject {0}")]
    MissingCredential(String),

    #[error("Refresh token expired or revoked")]
    ExpiredRefreshToken,

    #[error("Token endpoint rejected the refresh token: {0}")]
    InvalidGrant(String),

    #[error("Provider rejected a freshly refreshed access token")]
    TokenRejected,
}

/// Transport-level failures. Retried with bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Provider unavailable (HTTP {0})")]
    ServerUnavailable(u16),
}

impl NetworkError {
    /// Classify a reqwest transport error.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout
        } else {
            NetworkError::ConnectionReset(e.to_string())
        }
    }
}

/// The provider answered, but not the way the resumable protocol expects.
/// Triggers a resync rather than a blind retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Server committed {committed} bytes, expected {expected}")]
    RangeMismatch { expected: u64, committed: u64 },

    #[error("Initiation response carried no session URI")]
    MissingSessionUri,

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Caller input rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No media file supplied (or it is empty)")]
    MissingFile,

    #[error("Invalid video metadata: {0}")]
    InvalidMetadata(String),
}

/// Credential persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Credential store error: {0}")]
pub struct StoreError(pub String);

/// Failure while obtaining a usable access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    /// True when the user must sign in again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, TokenError::Auth(_))
    }
}

/// Structured reason an upload did not complete.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to read media: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gave up after {attempts} resyncs without progress at offset {committed}")]
    ResyncExhausted { attempts: u32, committed: u64 },

    #[error("Upload aborted")]
    Aborted,

    #[error("Upload session already finished")]
    AlreadyFinished,
}

impl From<TokenError> for UploadError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Auth(e) => UploadError::Auth(e),
            TokenError::Network(e) => UploadError::Network(e),
            TokenError::Protocol(e) => UploadError::Protocol(e),
            TokenError::Store(e) => UploadError::Store(e),
        }
    }
}

impl UploadError {
    /// Short machine-readable reason for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Auth(_) => "reauth_required",
            UploadError::Network(_) => "network_error",
            UploadError::Protocol(_) => "protocol_error",
            UploadError::Validation(_) => "validation_error",
            UploadError::Store(_) => "store_error",
            UploadError::Io(_) => "io_error",
            UploadError::ResyncExhausted { .. } => "resync_exhausted",
            UploadError::Aborted => "aborted",
            UploadError::AlreadyFinished => "already_finished",
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Sign-in required: {0}")]
    ReauthRequired(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Auth(e) => AppError::ReauthRequired(e.to_string()),
            TokenError::Store(e) => AppError::Database(e.0),
            other => AppError::ProviderApi(other.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Auth(e) => AppError::ReauthRequired(e.to_string()),
            UploadError::Validation(e) => AppError::BadRequest(e.to_string()),
            UploadError::Store(e) => AppError::Database(e.0),
            UploadError::Io(e) => AppError::Internal(e.into()),
            other => AppError::ProviderApi(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Database(e.0)
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::ReauthRequired(msg) => (
                StatusCode::UNAUTHORIZED,
                "reauth_required",
                Some(msg.clone()),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::ProviderApi(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
