// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential lifecycle: transparent access-token renewal.
//!
//! Each signed-in subject gets one `TokenRefresher`. It caches the current
//! credential, and serializes refresh-token grants behind a mutex so that
//! concurrent callers (an upload and a channel read, say) share the result
//! of a single network refresh.

use crate::db::CredentialStore;
use crate::error::{AuthError, NetworkError, ProtocolError, StoreError, TokenError};
use crate::models::Credential;
use crate::services::google::GoogleClient;
use crate::upload::retry::{retry_with_backoff, RetryAction, RetryError, RetryPolicy};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Default safety margin before expiry.
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 30;

/// What the refresher currently knows about its credential.
#[derive(Clone)]
enum CredentialState {
    /// Nothing cached yet; the store is authoritative.
    Cold,
    /// `skew` is the margin this credential is checked against. It is
    /// narrower than the configured one for very short-lived tokens.
    Active { credential: Credential, skew: Duration },
    /// The refresh token was rejected, or the user signed out.
    Revoked,
}

/// Token state machine for one subject.
pub struct TokenRefresher {
    subject_id: String,
    client: GoogleClient,
    store: Arc<dyn CredentialStore>,
    skew: Duration,
    /// Backoff for transient token-endpoint failures.
    retry: RetryPolicy,
    state: RwLock<CredentialState>,
    /// Held for the whole load-check-refresh sequence.
    refresh_lock: Mutex<()>,
}

impl TokenRefresher {
    pub fn new(
        subject_id: impl Into<String>,
        client: GoogleClient,
        store: Arc<dyn CredentialStore>,
        skew: Duration,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            client,
            store,
            skew,
            retry: RetryPolicy::token_refresh(),
            state: RwLock::new(CredentialState::Cold),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Get a credential whose access token is valid right now.
    ///
    /// 1. Check the cached credential (no I/O)
    /// 2. Acquire the refresh lock; concurrent callers queue here
    /// 3. Re-check the cache, a previous holder may have refreshed
    /// 4. Load from the store (another instance may have refreshed)
    /// 5. Refresh with the token endpoint if still expired
    pub async fn get_valid_token(&self) -> Result<Credential, TokenError> {
        if let Some(credential) = self.cached_fresh().await? {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(credential) = self.cached_fresh().await? {
            return Ok(credential);
        }

        let current = self.load_current().await?;
        if current.is_fresh(self.skew) {
            self.set_active(current.clone(), self.skew).await;
            return Ok(current);
        }

        self.refresh_locked(current).await
    }

    /// Unconditionally exchange the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<Credential, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        self.ensure_not_revoked().await?;
        let current = self.load_current().await?;
        self.refresh_locked(current).await
    }

    /// Refresh after the provider rejected `stale_access_token`, unless a
    /// concurrent caller already replaced it.
    pub async fn refresh_if_current(
        &self,
        stale_access_token: &str,
    ) -> Result<Credential, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        self.ensure_not_revoked().await?;

        let current = self.load_current().await?;
        if current.access_token != stale_access_token && current.is_fresh(self.skew) {
            self.set_active(current.clone(), self.skew).await;
            return Ok(current);
        }

        tracing::info!(
            subject_id = %self.subject_id,
            "Access token rejected by provider, refreshing"
        );
        self.refresh_locked(current).await
    }

    /// Replace the credential after a fresh interactive sign-in.
    pub async fn replace(&self, credential: Credential) {
        let _guard = self.refresh_lock.lock().await;
        self.set_active(credential, self.skew).await;
    }

    /// Mark the credential unusable. Later calls fail without network I/O.
    pub async fn revoke(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.set_state(CredentialState::Revoked).await;
    }

    async fn cached_fresh(&self) -> Result<Option<Credential>, TokenError> {
        match &*self.state.read().await {
            CredentialState::Revoked => Err(AuthError::ExpiredRefreshToken.into()),
            CredentialState::Active { credential, skew } if credential.is_fresh(*skew) => {
                Ok(Some(credential.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn ensure_not_revoked(&self) -> Result<(), TokenError> {
        if matches!(&*self.state.read().await, CredentialState::Revoked) {
            return Err(AuthError::ExpiredRefreshToken.into());
        }
        Ok(())
    }

    async fn set_state(&self, state: CredentialState) {
        *self.state.write().await = state;
    }

    async fn set_active(&self, credential: Credential, skew: Duration) {
        self.set_state(CredentialState::Active { credential, skew }).await;
    }

    /// Latest credential: the store first, the cache if the store is down.
    async fn load_current(&self) -> Result<Credential, TokenError> {
        match self.store.load(&self.subject_id).await {
            Ok(Some(credential)) => Ok(credential),
            Ok(None) => {
                self.set_state(CredentialState::Cold).await;
                Err(AuthError::MissingCredential(self.subject_id.clone()).into())
            }
            Err(e) => {
                if let CredentialState::Active { credential: cached, .. } = &*self.state.read().await {
                    tracing::warn!(
                        subject_id = %self.subject_id,
                        error = %e,
                        "Credential store unavailable, using cached credential"
                    );
                    return Ok(cached.clone());
                }
                Err(e.into())
            }
        }
    }

    /// Perform the refresh grant. Caller holds `refresh_lock`.
    async fn refresh_locked(&self, current: Credential) -> Result<Credential, TokenError> {
        tracing::info!(subject_id = %self.subject_id, "Refreshing access token");
        let requested_at = Utc::now();

        let client = &self.client;
        let refresh_token = current.refresh_token.as_str();
        let attempt = retry_with_backoff(&self.retry, &CancellationToken::new(), move |_| {
            async move {
                match client.refresh_token(refresh_token).await {
                    Ok(response) => RetryAction::Success(response),
                    Err(e @ TokenError::Network(_)) => RetryAction::Retry(e),
                    Err(e) => RetryAction::Fail(e),
                }
            }
        })
        .await;

        let response = match attempt {
            Ok(response) => response,
            Err(RetryError::Failed(TokenError::Auth(AuthError::InvalidGrant(detail)))) => {
                return self.handle_rejected_grant(&current, detail).await;
            }
            Err(RetryError::Failed(e)) => {
                tracing::warn!(subject_id = %self.subject_id, error = %e, "Token refresh failed");
                return Err(e);
            }
            // The token above is never cancelled.
            Err(RetryError::Cancelled) => return Err(NetworkError::Timeout.into()),
        };

        if response.expires_in <= 0 {
            return Err(ProtocolError::MalformedResponse(format!(
                "token endpoint returned expires_in={}",
                response.expires_in
            ))
            .into());
        }
        let lifetime = Duration::seconds(response.expires_in);
        // A token that lives no longer than the skew would never count as
        // fresh. Check those against half their lifetime instead.
        let skew = self.skew.min(lifetime / 2);

        let scopes = match response.scopes() {
            s if s.is_empty() => current.scopes.clone(),
            s => s,
        };
        let refreshed = Credential {
            subject_id: self.subject_id.clone(),
            access_token: response.access_token,
            // Google only sends a refresh token when it rotates it.
            refresh_token: response.refresh_token.unwrap_or(current.refresh_token),
            expires_at: requested_at + lifetime,
            scopes,
        };

        // Cache first: a rotated refresh token must not be lost if the
        // store write fails.
        self.set_active(refreshed.clone(), skew).await;
        self.store.save(&refreshed).await.map_err(|e: StoreError| {
            tracing::error!(subject_id = %self.subject_id, error = %e, "Failed to persist refreshed credential");
            e
        })?;

        tracing::info!(
            subject_id = %self.subject_id,
            expires_at = %refreshed.expires_at,
            skew_secs = skew.num_seconds(),
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    /// `invalid_grant`: either another instance rotated the refresh token
    /// under us, or the grant is gone for good.
    async fn handle_rejected_grant(
        &self,
        attempted: &Credential,
        detail: String,
    ) -> Result<Credential, TokenError> {
        if let Ok(Some(stored)) = self.store.load(&self.subject_id).await {
            if stored.refresh_token != attempted.refresh_token && stored.is_fresh(self.skew) {
                tracing::info!(
                    subject_id = %self.subject_id,
                    "Refresh token race detected - another instance won, using its tokens"
                );
                self.set_active(stored.clone(), self.skew).await;
                return Ok(stored);
            }
        }

        tracing::warn!(
            subject_id = %self.subject_id,
            detail = %detail,
            "Refresh token rejected, credential revoked"
        );
        self.set_state(CredentialState::Revoked).await;
        if let Err(e) = self.store.remove(&self.subject_id).await {
            tracing::warn!(subject_id = %self.subject_id, error = %e, "Failed to remove revoked credential");
        }
        Err(AuthError::InvalidGrant(detail).into())
    }
}

/// One `TokenRefresher` per subject, shared by handlers and upload jobs.
pub struct TokenRefreshers {
    client: GoogleClient,
    store: Arc<dyn CredentialStore>,
    skew: Duration,
    retry: RetryPolicy,
    refreshers: DashMap<String, Arc<TokenRefresher>>,
}

impl TokenRefreshers {
    pub fn new(client: GoogleClient, store: Arc<dyn CredentialStore>, skew: Duration) -> Self {
        Self {
            client,
            store,
            skew,
            retry: RetryPolicy::token_refresh(),
            refreshers: DashMap::new(),
        }
    }

    /// Backoff used by every refresher created from now on.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The subject's refresher, created on first use.
    pub fn for_subject(&self, subject_id: &str) -> Arc<TokenRefresher> {
        self.refreshers
            .entry(subject_id.to_string())
            .or_insert_with(|| {
                Arc::new(
                    TokenRefresher::new(
                        subject_id,
                        self.client.clone(),
                        self.store.clone(),
                        self.skew,
                    )
                    .with_retry_policy(self.retry.clone()),
                )
            })
            .clone()
    }

    /// Persist a credential from the initial grant and make it current.
    pub async fn install(&self, credential: Credential) -> Result<Arc<TokenRefresher>, StoreError> {
        self.store.save(&credential).await?;
        let refresher = self.for_subject(&credential.subject_id);
        refresher.replace(credential).await;
        Ok(refresher)
    }

    /// Explicit sign-out: forget the credential everywhere.
    pub async fn sign_out(&self, subject_id: &str) -> Result<(), StoreError> {
        if let Some((_, refresher)) = self.refreshers.remove(subject_id) {
            refresher.revoke().await;
        }
        self.store.remove(subject_id).await?;
        tracing::info!(subject_id, "Signed out, credential removed");
        Ok(())
    }
}
