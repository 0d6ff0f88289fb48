// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth and YouTube Data API client.
//!
//! Handles:
//! - Authorization-code exchange and refresh-token grants
//! - Userinfo lookup (subject id for the credential)
//! - Channel, video and category reads used by the metadata features

use crate::config::ProviderEndpoints;
use crate::error::{AppError, AuthError, NetworkError, ProtocolError, TokenError};
use crate::models::video::ListResponse;
use crate::models::{ChannelResource, VideoCategory, VideoResource};
use crate::services::token::TokenRefreshers;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;

/// Scopes requested at sign-in.
pub const OAUTH_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "email",
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.force-ssl",
    "https://www.googleapis.com/auth/youtube.readonly",
];

/// Google API client.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
    client_secret: String,
}

impl GoogleClient {
    /// Create a new client with OAuth credentials.
    pub fn new(
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            endpoints,
            client_id,
            client_secret,
        }
    }

    /// Consent-screen URL. `access_type=offline` and `prompt=consent` make
    /// Google hand out a refresh token on every sign-in.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}\
             &access_type=offline&prompt=consent&include_granted_scopes=true&state={}",
            self.endpoints.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&OAUTH_SCOPES.join(" ")),
            urlencoding::encode(state),
        )
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, TokenError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    /// Exchange an authorization code for the initial token pair.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, TokenError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, TokenError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| {
                ProtocolError::MalformedResponse(format!("token response: {}", e)).into()
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_token_failure(status.as_u16(), &body))
    }

    /// Identify the signed-in user.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo, AppError> {
        self.get_json(&self.endpoints.userinfo_url, access_token, &[])
            .await
    }

    /// The user's own channel, if they have one.
    pub async fn fetch_channel(
        &self,
        access_token: &str,
    ) -> Result<Option<ChannelResource>, AppError> {
        let url = format!("{}/youtube/v3/channels", self.endpoints.api_base);
        let list: ListResponse<ChannelResource> = self
            .get_json(
                &url,
                access_token,
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("mine", "true"),
                ],
            )
            .await?;
        Ok(list.items.into_iter().next())
    }

    /// Fetch a single video by id.
    pub async fn fetch_video(
        &self,
        access_token: &str,
        video_id: &str,
    ) -> Result<Option<VideoResource>, AppError> {
        let url = format!("{}/youtube/v3/videos", self.endpoints.api_base);
        let list: ListResponse<VideoResource> = self
            .get_json(
                &url,
                access_token,
                &[("part", "snippet,statistics"), ("id", video_id)],
            )
            .await?;
        Ok(list.items.into_iter().next())
    }

    /// Categories that uploads in `region_code` may use.
    pub async fn list_categories(
        &self,
        access_token: &str,
        region_code: &str,
    ) -> Result<Vec<VideoCategory>, AppError> {
        let url = format!("{}/youtube/v3/videoCategories", self.endpoints.api_base);
        let list: ListResponse<CategoryItem> = self
            .get_json(
                &url,
                access_token,
                &[("part", "snippet"), ("regionCode", region_code)],
            )
            .await?;

        Ok(list
            .items
            .into_iter()
            .filter(|item| item.snippet.assignable)
            .map(|item| VideoCategory {
                id: item.id,
                title: item.snippet.title,
            })
            .collect())
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 {
                return Err(AppError::ReauthRequired(
                    "access token rejected by provider".to_string(),
                ));
            }
            if status.as_u16() == 429 {
                tracing::warn!("YouTube API rate limit hit (429)");
            }

            return Err(AppError::ProviderApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ProviderApi(format!("JSON parse error: {}", e)))
    }
}

/// Map a failed token-endpoint response onto the error taxonomy.
fn classify_token_failure(status: u16, body: &str) -> TokenError {
    let parsed: Option<TokenErrorBody> = serde_json::from_str(body).ok();

    if let Some(err) = &parsed {
        if err.error == "invalid_grant" || err.error == "unauthorized_client" {
            let detail = err
                .error_description
                .clone()
                .unwrap_or_else(|| err.error.clone());
            return AuthError::InvalidGrant(detail).into();
        }
    }

    if status >= 500 || status == 429 {
        return NetworkError::ServerUnavailable(status).into();
    }

    ProtocolError::UnexpectedStatus {
        status,
        body: body.to_string(),
    }
    .into()
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Only present on the initial grant, or when Google rotates it
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OpenID Connect userinfo.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    id: String,
    snippet: CategorySnippet,
}

#[derive(Debug, Deserialize)]
struct CategorySnippet {
    title: String,
    #[serde(default)]
    assignable: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// YouTubeService - metadata reads with token management
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata reads on behalf of a signed-in subject. Every call asks the
/// subject's `TokenRefresher` for a valid token first.
#[derive(Clone)]
pub struct YouTubeService {
    client: GoogleClient,
    tokens: Arc<TokenRefreshers>,
}

impl YouTubeService {
    pub fn new(client: GoogleClient, tokens: Arc<TokenRefreshers>) -> Self {
        Self { client, tokens }
    }

    /// Run `op` with a valid token. A 401 triggers one refresh and retry.
    async fn with_token<T, F, Fut>(&self, subject_id: &str, op: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let refresher = self.tokens.for_subject(subject_id);
        let credential = refresher.get_valid_token().await?;

        match op(credential.access_token.clone()).await {
            Err(AppError::ReauthRequired(_)) => {
                let renewed = refresher
                    .refresh_if_current(&credential.access_token)
                    .await?;
                op(renewed.access_token).await
            }
            other => other,
        }
    }

    pub async fn fetch_channel(&self, subject_id: &str) -> Result<Option<ChannelResource>, AppError> {
        self.with_token(subject_id, |token| async move {
            self.client.fetch_channel(&token).await
        })
        .await
    }

    /// One video, looked up with the subject's token.
    pub async fn fetch_video(
        &self,
        subject_id: &str,
        video_id: &str,
    ) -> Result<Option<VideoResource>, AppError> {
        self.with_token(subject_id, |token| async move {
            self.client.fetch_video(&token, video_id).await
        })
        .await
    }

    pub async fn list_categories(
        &self,
        subject_id: &str,
        region_code: &str,
    ) -> Result<Vec<VideoCategory>, AppError> {
        self.with_token(subject_id, |token| async move {
            self.client.list_categories(&token, region_code).await
        })
        .await
    }
}
