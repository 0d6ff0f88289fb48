// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth sign-in and sign-out routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, Claims, SESSION_COOKIE};
use crate::models::Credential;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Signed OAuth state older than this is rejected.
const OAUTH_STATE_MAX_AGE_MS: u128 = 10 * 60 * 1000;

const SESSION_COOKIE_DAYS: i64 = 30;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google", get(auth_start))
        .route("/auth/google/callback", get(auth_callback))
        .route("/auth/logout", post(logout))
}

/// Query parameters for starting OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Frontend URL to return to afterwards. Defaults to FRONTEND_URL.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start OAuth flow - redirect to the Google consent screen.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
    headers: axum::http::HeaderMap,
) -> Result<Redirect> {
    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());
    if !is_allowed_frontend(&frontend_url, &state.config.frontend_url) {
        return Err(AppError::BadRequest("redirect_uri not allowed".to_string()));
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    let oauth_state = sign_state(&frontend_url, timestamp, &state.config.oauth_state_key)?;
    let callback_url = callback_url(&headers);
    let auth_url = state
        .google
        .authorization_url(&callback_url, &oauth_state);

    tracing::info!(
        client_id = %state.config.google_client_id,
        frontend_url = %frontend_url,
        "Starting OAuth flow, redirecting to Google"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange code for tokens, persist them, create session.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect)> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    let Some(frontend_url) =
        verify_and_decode_state(&params.state, &state.config.oauth_state_key, now_ms)
    else {
        tracing::warn!("Invalid, expired or tampered OAuth state parameter");
        return Err(AppError::BadRequest("invalid OAuth state".to_string()));
    };

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from Google");
        let redirect = format!("{}?error={}", frontend_url, urlencoding::encode(&error));
        return Ok((jar, Redirect::temporary(&redirect)));
    }
    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("missing authorization code".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");
    let callback_url = callback_url(&headers);
    let tokens = state
        .google
        .exchange_code(&code, &callback_url)
        .await?;

    let Some(refresh_token) = tokens.refresh_token.clone() else {
        tracing::warn!("Token response carried no refresh token");
        return Err(AppError::ReauthRequired(
            "Google did not issue a refresh token".to_string(),
        ));
    };

    let user = state.google.fetch_userinfo(&tokens.access_token).await?;

    let credential = Credential {
        subject_id: user.sub.clone(),
        access_token: tokens.access_token.clone(),
        refresh_token,
        expires_at: Utc::now() + chrono::Duration::seconds(tokens.expires_in),
        scopes: tokens.scopes(),
    };
    state.tokens.install(credential).await?;

    tracing::info!(
        subject_id = %user.sub,
        email = user.email.as_deref().unwrap_or(""),
        "OAuth successful, credential stored"
    );

    let jwt = create_jwt(&user.sub, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    let cookie = Cookie::build((SESSION_COOKIE, jwt))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(is_secure_frontend(&frontend_url))
        .max_age(time::Duration::days(SESSION_COOKIE_DAYS))
        .build();

    let redirect_url = format!("{}/callback", frontend_url.trim_end_matches('/'));
    Ok((jar.add(cookie), Redirect::temporary(&redirect_url)))
}

/// Sign out: revoke the stored credential, stop uploads, clear the cookie.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<impl IntoResponse> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let key = DecodingKey::from_secret(&state.config.jwt_signing_key);
        if let Ok(data) = decode::<Claims>(cookie.value(), &key, &Validation::new(Algorithm::HS256))
        {
            state.jobs.abort_all(&data.claims.sub);
            state.tokens.sign_out(&data.claims.sub).await?;
        }
    }

    let removal = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(is_secure_frontend(&state.config.frontend_url))
        .build();

    Ok((jar.remove(removal), StatusCode::NO_CONTENT))
}

fn callback_url(headers: &axum::http::HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            std::env::var("API_HOST").unwrap_or_else(|_| "localhost:8080".to_string())
        });

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    format!("{}://{}/auth/google/callback", scheme, host)
}

/// Same origins the CORS layer admits.
pub(crate) fn is_allowed_frontend(candidate: &str, configured: &str) -> bool {
    candidate == configured
        || candidate.starts_with("http://localhost")
        || candidate.starts_with("http://127.0.0.1")
}

fn is_secure_frontend(frontend_url: &str) -> bool {
    frontend_url.starts_with("https://")
}

/// `base64url("frontend_url|timestamp_hex|hmac_hex")`
fn sign_state(frontend_url: &str, timestamp_ms: u128, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", frontend_url, timestamp_ms);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify HMAC signature and age, and decode the frontend URL from the
/// OAuth state parameter.
fn verify_and_decode_state(state: &str, secret: &[u8], now_ms: u128) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // The frontend URL may itself contain '|', so split from the right.
    let mut parts = state_str.rsplitn(3, '|');
    let signature_hex = parts.next()?;
    let timestamp_hex = parts.next()?;
    let frontend_url = parts.next()?;

    let payload = format!("{}|{}", frontend_url, timestamp_hex);
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(signature_hex.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let issued_ms = u128::from_str_radix(timestamp_hex, 16).ok()?;
    if now_ms.saturating_sub(issued_ms) > OAUTH_STATE_MAX_AGE_MS {
        tracing::warn!("OAuth state expired");
        return None;
    }

    Some(frontend_url.to_string())
}
