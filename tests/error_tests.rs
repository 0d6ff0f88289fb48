// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use tube_uploader::error::{
    AppError, AuthError, NetworkError, ProtocolError, StoreError, TokenError, UploadError,
    ValidationError,
};

fn status_of(err: impl Into<AppError>) -> StatusCode {
    err.into().into_response().status()
}

#[test]
fn test_token_errors_requiring_reauth() {
    assert!(TokenError::from(AuthError::ExpiredRefreshToken).requires_reauth());
    assert!(TokenError::from(AuthError::InvalidGrant("revoked".into())).requires_reauth());
    assert!(TokenError::from(AuthError::MissingCredential("s".into())).requires_reauth());

    assert!(!TokenError::from(NetworkError::Timeout).requires_reauth());
    assert!(!TokenError::from(NetworkError::ServerUnavailable(503)).requires_reauth());
    assert!(!TokenError::from(StoreError("down".into())).requires_reauth());
}

#[test]
fn test_token_error_keeps_category_in_upload_error() {
    let err = UploadError::from(TokenError::from(AuthError::ExpiredRefreshToken));
    assert!(matches!(err, UploadError::Auth(AuthError::ExpiredRefreshToken)));
    assert_eq!(err.kind(), "reauth_required");

    let err = UploadError::from(TokenError::from(NetworkError::Timeout));
    assert!(matches!(err, UploadError::Network(NetworkError::Timeout)));
    assert_eq!(err.kind(), "network_error");
}

#[test]
fn test_upload_error_kinds() {
    assert_eq!(UploadError::Aborted.kind(), "aborted");
    assert_eq!(UploadError::AlreadyFinished.kind(), "already_finished");
    assert_eq!(
        UploadError::from(ValidationError::MissingFile).kind(),
        "validation_error"
    );
    assert_eq!(
        UploadError::from(ProtocolError::MissingSessionUri).kind(),
        "protocol_error"
    );
    assert_eq!(
        UploadError::ResyncExhausted {
            attempts: 3,
            committed: 10
        }
        .kind(),
        "resync_exhausted"
    );
}

#[test]
fn test_upload_errors_map_to_http_status() {
    assert_eq!(
        status_of(UploadError::from(ValidationError::InvalidMetadata("title".into()))),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status_of(UploadError::from(AuthError::TokenRejected)),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        status_of(UploadError::from(NetworkError::ServerUnavailable(503))),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        status_of(UploadError::from(StoreError("down".into()))),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_token_errors_map_to_http_status() {
    assert_eq!(
        status_of(TokenError::from(AuthError::ExpiredRefreshToken)),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        status_of(TokenError::from(NetworkError::Timeout)),
        StatusCode::BAD_GATEWAY
    );
}

#[test]
fn test_app_error_status() {
    assert_eq!(status_of(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
    assert_eq!(
        status_of(AppError::NotFound("x".into())),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(AppError::Internal(anyhow::anyhow!("boom"))),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
