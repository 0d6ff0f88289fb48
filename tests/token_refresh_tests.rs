// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential lifecycle tests against a local fake token endpoint.
//!
//! These tests verify that:
//! 1. Expired access tokens are refreshed and the result persisted
//! 2. Concurrent callers share a single refresh request
//! 3. A rejected refresh token revokes the credential
//! 4. Refresh-token rotation is honoured, and absence of rotation is too
//! 5. Token-endpoint outages are retried, then surface as network errors
//! 6. Tokens shorter-lived than the expiry margin are still usable

use chrono::{Duration, Utc};
use std::sync::Arc;
use tube_uploader::db::{CredentialStore, MemoryCredentialStore};
use tube_uploader::error::{AuthError, NetworkError, ProtocolError, TokenError};
use tube_uploader::services::TokenRefreshers;

mod common;
use common::{credential, refresher, seeded_store, spawn_fake_provider, SUBJECT};

#[tokio::test]
async fn test_expired_credential_is_refreshed_and_persisted() {
    let provider = spawn_fake_provider().await;
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    let before = Utc::now();
    let fresh = tokens.get_valid_token().await.unwrap();

    assert_eq!(fresh.access_token, "access-1");
    assert_eq!(fresh.refresh_token, "refresh-1");
    assert!(fresh.expires_at >= before + Duration::seconds(3600));
    assert!(fresh.expires_at <= Utc::now() + Duration::seconds(3600));
    assert_eq!(provider.state.refresh_calls(), 1);

    let stored = store.load(SUBJECT).await.unwrap().unwrap();
    assert_eq!(stored, fresh);
}

#[tokio::test]
async fn test_fresh_credential_needs_no_network() {
    let provider = spawn_fake_provider().await;
    let store = seeded_store(credential("current", "refresh-1", 3600)).await;
    let tokens = refresher(&provider, store, 30);

    for _ in 0..3 {
        let c = tokens.get_valid_token().await.unwrap();
        assert_eq!(c.access_token, "current");
    }
    assert_eq!(provider.state.refresh_calls(), 0);
}

#[tokio::test]
async fn test_expiry_within_skew_triggers_refresh() {
    let provider = spawn_fake_provider().await;
    // Still technically valid for 10 seconds, but inside the 30 second margin.
    let store = seeded_store(credential("almost", "refresh-1", 10)).await;
    let tokens = refresher(&provider, store, 30);

    let c = tokens.get_valid_token().await.unwrap();
    assert_eq!(c.access_token, "access-1");
    assert_eq!(provider.state.refresh_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let provider = spawn_fake_provider().await;
    provider
        .state
        .with(|f| f.token_delay = std::time::Duration::from_millis(150));
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store, 30);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let tokens = tokens.clone();
            tokio::spawn(async move { tokens.get_valid_token().await })
        })
        .collect();

    for handle in handles {
        let c = handle.await.unwrap().unwrap();
        assert_eq!(c.access_token, "access-1");
    }
    assert_eq!(provider.state.refresh_calls(), 1);
}

#[tokio::test]
async fn test_invalid_grant_revokes_credential() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.reject_grant = true);
    let store = seeded_store(credential("stale", "revoked-refresh", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    let err = tokens.get_valid_token().await.unwrap_err();
    assert!(matches!(err, TokenError::Auth(AuthError::InvalidGrant(_))));
    assert!(err.requires_reauth());
    assert!(store.load(SUBJECT).await.unwrap().is_none());

    // No further network traffic once revoked.
    let err = tokens.get_valid_token().await.unwrap_err();
    assert!(err.requires_reauth());
    assert_eq!(provider.state.refresh_calls(), 1);
}

#[tokio::test]
async fn test_token_endpoint_503_is_retried() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.token_failures = 2);
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    let c = tokens.get_valid_token().await.unwrap();
    assert_eq!(c.access_token, "access-1");
    assert_eq!(provider.state.refresh_calls(), 3);
    assert_eq!(store.load(SUBJECT).await.unwrap().unwrap(), c);
}

#[tokio::test]
async fn test_token_endpoint_outage_keeps_credential() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.token_failures = 10);
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    let err = tokens.get_valid_token().await.unwrap_err();
    assert_eq!(err, TokenError::Network(NetworkError::ServerUnavailable(503)));
    assert!(!err.requires_reauth());
    // Attempt budget of the test policy.
    assert_eq!(provider.state.refresh_calls(), 3);

    // Not revoked: once the endpoint recovers the same refresh token works.
    provider.state.with(|f| f.token_failures = 0);
    assert_eq!(store.load(SUBJECT).await.unwrap().unwrap().refresh_token, "refresh-1");
    assert_eq!(tokens.get_valid_token().await.unwrap().access_token, "access-1");
}

#[tokio::test]
async fn test_token_shorter_than_skew_is_still_fresh() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.expires_in = 10);
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store, 30);

    let before = Utc::now();
    let c = tokens.get_valid_token().await.unwrap();
    assert_eq!(c.access_token, "access-1");
    assert!(c.expires_at >= before + Duration::seconds(10));
    assert!(c.is_fresh(Duration::seconds(4)));

    // Served from cache, not refreshed again on every call.
    for _ in 0..3 {
        assert_eq!(tokens.get_valid_token().await.unwrap().access_token, "access-1");
    }
    assert_eq!(provider.state.refresh_calls(), 1);
}

#[tokio::test]
async fn test_token_without_lifetime_is_rejected() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.expires_in = 0);
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store, 30);

    let err = tokens.get_valid_token().await.unwrap_err();
    assert!(matches!(
        err,
        TokenError::Protocol(ProtocolError::MalformedResponse(_))
    ));
    assert!(!err.requires_reauth());
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_refresh_token() {
    let provider = spawn_fake_provider().await;
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    tokens.refresh().await.unwrap();
    let stored = store.load(SUBJECT).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token, "refresh-1");
}

#[tokio::test]
async fn test_rotated_refresh_token_is_persisted() {
    let provider = spawn_fake_provider().await;
    provider.state.with(|f| f.rotate_refresh = true);
    let store = seeded_store(credential("stale", "refresh-original", -60)).await;
    let tokens = refresher(&provider, store.clone(), 30);

    let c = tokens.get_valid_token().await.unwrap();
    assert_eq!(c.refresh_token, "refresh-1");
    let stored = store.load(SUBJECT).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token, c.refresh_token);
    assert_eq!(stored.access_token, "access-1");
}

#[tokio::test]
async fn test_refresh_if_current_skips_replaced_token() {
    let provider = spawn_fake_provider().await;
    let store = seeded_store(credential("stale", "refresh-1", -60)).await;
    let tokens = refresher(&provider, store, 30);

    let first = tokens.get_valid_token().await.unwrap();
    // A caller still holding the old token reports it rejected.
    let again = tokens.refresh_if_current("stale").await.unwrap();
    assert_eq!(again.access_token, first.access_token);
    assert_eq!(provider.state.refresh_calls(), 1);

    // The current token itself being rejected forces a new one.
    let renewed = tokens.refresh_if_current(&first.access_token).await.unwrap();
    assert_eq!(renewed.access_token, "access-2");
    assert_eq!(provider.state.refresh_calls(), 2);
}

#[tokio::test]
async fn test_missing_credential_requires_sign_in() {
    let provider = spawn_fake_provider().await;
    let store: Arc<MemoryCredentialStore> = Arc::new(MemoryCredentialStore::new());
    let tokens = refresher(&provider, store, 30);

    let err = tokens.get_valid_token().await.unwrap_err();
    assert_eq!(
        err,
        TokenError::Auth(AuthError::MissingCredential(SUBJECT.to_string()))
    );
    assert_eq!(provider.state.refresh_calls(), 0);
}

#[tokio::test]
async fn test_sign_out_forgets_credential() {
    let provider = spawn_fake_provider().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let registry = TokenRefreshers::new(provider.google_client(), store.clone(), Duration::seconds(30));

    let installed = registry
        .install(credential("signed-in", "refresh-1", 3600))
        .await
        .unwrap();
    assert_eq!(installed.get_valid_token().await.unwrap().access_token, "signed-in");
    assert!(Arc::ptr_eq(&installed, &registry.for_subject(SUBJECT)));

    registry.sign_out(SUBJECT).await.unwrap();
    assert!(store.is_empty());
    assert!(installed.get_valid_token().await.unwrap_err().requires_reauth());
    assert!(registry
        .for_subject(SUBJECT)
        .get_valid_token()
        .await
        .unwrap_err()
        .requires_reauth());
}
