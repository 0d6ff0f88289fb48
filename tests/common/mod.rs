// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test helpers, including a local fake of the Google token endpoint
//! and the YouTube resumable upload API.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Form, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tube_uploader::config::{Config, ProviderEndpoints, UploadSettings};
use tube_uploader::db::{CredentialStore, MemoryCredentialStore};
use tube_uploader::models::Credential;
use tube_uploader::routes::create_router;
use tube_uploader::services::{GoogleClient, TokenRefresher};
use tube_uploader::upload::RetryPolicy;
use tube_uploader::AppState;

pub const SUBJECT: &str = "subject-1";
pub const VIDEO_ID: &str = "video-123";

/// Knobs and recordings of the fake provider.
pub struct FakeInner {
    // Token endpoint
    pub token_delay: Duration,
    pub reject_grant: bool,
    pub rotate_refresh: bool,
    pub expires_in: i64,
    /// Number of 503s the token endpoint still returns before answering.
    pub token_failures: u32,
    issued: u32,
    pub valid_tokens: HashSet<String>,
    /// When set, API reads and chunk PUTs need a token the fake issued.
    pub require_known_token: bool,

    // Uploads
    pub total: u64,
    pub committed: Vec<u8>,
    pub completed: bool,
    /// Chunk offset -> number of 503s still to return for it.
    pub fail_at: HashMap<u64, u32>,
    /// Accept the chunk at `.0`, then roll the session back to `.1` bytes.
    pub truncate_at: Option<(u64, u64)>,
    /// Return 401 once for the chunk at this offset.
    pub reject_token_at: Option<u64>,
    /// Hold the first request for the chunk at this offset for `stall_for`
    /// without answering, so the client times out.
    pub stall_at: Option<u64>,
    pub stall_for: Duration,
    pub stalled: u32,
    /// Added to every chunk PUT before it is handled.
    pub chunk_delay: Duration,
    pub chunk_starts: Vec<u64>,
    pub chunk_lengths: Vec<u64>,
    /// Bearer token each chunk PUT carried.
    pub chunk_tokens: Vec<String>,
}

impl Default for FakeInner {
    fn default() -> Self {
        Self {
            token_delay: Duration::ZERO,
            reject_grant: false,
            rotate_refresh: false,
            expires_in: 3600,
            token_failures: 0,
            issued: 0,
            valid_tokens: HashSet::new(),
            require_known_token: false,
            total: 0,
            committed: Vec::new(),
            completed: false,
            fail_at: HashMap::new(),
            truncate_at: None,
            reject_token_at: None,
            stall_at: None,
            stall_for: Duration::from_secs(5),
            stalled: 0,
            chunk_delay: Duration::ZERO,
            chunk_starts: Vec::new(),
            chunk_lengths: Vec::new(),
            chunk_tokens: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub inner: Mutex<FakeInner>,
    pub refresh_calls: AtomicU32,
    pub initiate_calls: AtomicU32,
    pub probe_calls: AtomicU32,
}

impl FakeState {
    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn initiate_calls(&self) -> u32 {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeInner) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }
}

pub struct FakeProvider {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints::with_base(&self.base_url)
    }

    pub fn google_client(&self) -> GoogleClient {
        GoogleClient::new(
            reqwest::Client::new(),
            self.endpoints(),
            "client-id".to_string(),
            "client-secret".to_string(),
        )
    }
}

/// Start the fake on an ephemeral local port.
pub async fn spawn_fake_provider() -> FakeProvider {
    let state = Arc::new(FakeState::default());

    let app = Router::new()
        .route("/token", post(token))
        .route("/v1/userinfo", get(userinfo))
        .route("/upload/youtube/v3/videos", post(initiate_upload))
        .route("/upload/session/{id}", put(upload_chunk))
        .route("/youtube/v3/channels", get(channels))
        .route("/youtube/v3/videos", get(videos))
        .route("/youtube/v3/videoCategories", get(categories))
        .layer(DefaultBodyLimit::disable())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeProvider {
        base_url: format!("http://{}", addr),
        state,
    }
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string()
}

fn token_ok(state: &FakeState, headers: &HeaderMap) -> bool {
    let inner = state.inner.lock().unwrap();
    !inner.require_known_token || inner.valid_tokens.contains(&bearer(headers))
}

async fn token(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let grant_type = form.get("grant_type").cloned().unwrap_or_default();
    if grant_type == "refresh_token" {
        state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    }

    let delay = state.with(|inner| inner.token_delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut inner = state.inner.lock().unwrap();
    if inner.token_failures > 0 {
        inner.token_failures -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if inner.reject_grant {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })),
        )
            .into_response();
    }

    inner.issued += 1;
    let access_token = format!("access-{}", inner.issued);
    inner.valid_tokens.insert(access_token.clone());

    let mut body = serde_json::json!({
        "access_token": access_token,
        "expires_in": inner.expires_in,
        "token_type": "Bearer",
        "scope": "openid https://www.googleapis.com/auth/youtube.upload",
    });
    if grant_type == "authorization_code" {
        body["refresh_token"] = "refresh-initial".into();
    } else if inner.rotate_refresh {
        body["refresh_token"] = format!("refresh-{}", inner.issued).into();
    }
    Json(body).into_response()
}

async fn userinfo(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !token_ok(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({ "sub": SUBJECT, "email": "user@example.com" })).into_response()
}

async fn initiate_upload(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.initiate_calls.fetch_add(1, Ordering::SeqCst);
    if !token_ok(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(total) = headers
        .get("x-upload-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();

    state.with(|inner| {
        inner.total = total;
        inner.committed.clear();
        inner.completed = false;
    });

    (
        StatusCode::OK,
        [(header::LOCATION, format!("http://{}/upload/session/s1", host))],
    )
        .into_response()
}

fn incomplete(committed: usize) -> Response {
    if committed == 0 {
        return StatusCode::PERMANENT_REDIRECT.into_response();
    }
    (
        StatusCode::PERMANENT_REDIRECT,
        [(header::RANGE, format!("bytes=0-{}", committed - 1))],
    )
        .into_response()
}

fn created() -> Response {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "kind": "youtube#video", "id": VIDEO_ID })),
    )
        .into_response()
}

/// First byte of a `a-b/total` content range.
fn chunk_start(spec: &str) -> Option<u64> {
    let (span, _total) = spec.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    end.parse::<u64>().ok()?;
    start.parse::<u64>().ok()
}

async fn upload_chunk(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = bearer(&headers);
    let range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let Some(spec) = range.strip_prefix("bytes ") else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Some(start) = chunk_start(spec) {
        let (delay, stall) = state.with(|inner| {
            let stall = if inner.stall_at == Some(start) {
                inner.stall_at = None;
                inner.stalled += 1;
                Some(inner.stall_for)
            } else {
                None
            };
            (inner.chunk_delay, stall)
        });
        if let Some(stall) = stall {
            // The client gives up first and drops the connection.
            tokio::time::sleep(stall).await;
            return StatusCode::GATEWAY_TIMEOUT.into_response();
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    let mut inner = state.inner.lock().unwrap();

    if spec.starts_with("*/") {
        state.probe_calls.fetch_add(1, Ordering::SeqCst);
        if inner.completed {
            return created();
        }
        return incomplete(inner.committed.len());
    }
    if inner.completed {
        return created();
    }

    let Some(start) = chunk_start(spec) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    inner.chunk_starts.push(start);
    inner.chunk_lengths.push(body.len() as u64);
    inner.chunk_tokens.push(token.clone());

    if inner.reject_token_at == Some(start) {
        inner.reject_token_at = None;
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if inner.require_known_token && !inner.valid_tokens.contains(&token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(remaining) = inner.fail_at.get_mut(&start) {
        if *remaining > 0 {
            *remaining -= 1;
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }
    if start != inner.committed.len() as u64 {
        return incomplete(inner.committed.len());
    }

    inner.committed.extend_from_slice(&body);

    if let Some((at, to)) = inner.truncate_at {
        if at == start {
            inner.truncate_at = None;
            inner.committed.truncate(to as usize);
            return incomplete(inner.committed.len());
        }
    }

    if inner.committed.len() as u64 == inner.total {
        inner.completed = true;
        return created();
    }
    incomplete(inner.committed.len())
}

async fn channels(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !token_ok(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "items": [{
            "id": "UC123",
            "snippet": { "title": "Test Channel", "description": "" },
            "statistics": { "videoCount": "3", "subscriberCount": "10", "viewCount": "100" }
        }]
    }))
    .into_response()
}

async fn videos(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !token_ok(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "items": [{
            "id": VIDEO_ID,
            "snippet": { "title": "Uploaded", "description": "d", "tags": ["a"] },
            "statistics": { "viewCount": "1" }
        }]
    }))
    .into_response()
}

async fn categories(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !token_ok(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "items": [
            { "id": "22", "snippet": { "title": "People & Blogs", "assignable": true } },
            { "id": "18", "snippet": { "title": "Short Movies", "assignable": false } }
        ]
    }))
    .into_response()
}

// ─── Fixtures ────────────────────────────────────────────────

/// Upload settings with millisecond backoff so failure paths run fast.
#[allow(dead_code)]
pub fn fast_upload_settings(chunk_size: u64) -> UploadSettings {
    UploadSettings {
        chunk_size,
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(10),
        max_resyncs: 3,
        spool_dir: std::env::temp_dir().join(format!("tube-uploader-test-{}", uuid::Uuid::new_v4())),
    }
}

#[allow(dead_code)]
pub fn credential(access_token: &str, refresh_token: &str, expires_in_secs: i64) -> Credential {
    Credential {
        subject_id: SUBJECT.to_string(),
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        scopes: vec!["https://www.googleapis.com/auth/youtube.upload".to_string()],
    }
}

/// A memory store holding one credential for `SUBJECT`.
#[allow(dead_code)]
pub async fn seeded_store(credential: Credential) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    store.save(&credential).await.unwrap();
    store
}

#[allow(dead_code)]
pub fn refresher(
    provider: &FakeProvider,
    store: Arc<dyn CredentialStore>,
    skew_secs: i64,
) -> Arc<TokenRefresher> {
    Arc::new(
        TokenRefresher::new(
            SUBJECT,
            provider.google_client(),
            store,
            ChronoDuration::seconds(skew_secs),
        )
        .with_retry_policy(fast_retry_policy()),
    )
}

/// Token-endpoint backoff in milliseconds.
#[allow(dead_code)]
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

/// Create a test app with an in-memory credential store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    create_test_app_with(Config::test_default(), Arc::new(MemoryCredentialStore::new()))
}

#[allow(dead_code)]
pub fn create_test_app_with(
    config: Config,
    store: Arc<dyn CredentialStore>,
) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config, store).unwrap());
    (create_router(state.clone()), state)
}

/// Config whose provider endpoints all point at `provider`.
#[allow(dead_code)]
pub fn config_for(provider: &FakeProvider, chunk_size: u64) -> Config {
    Config {
        endpoints: provider.endpoints(),
        upload: fast_upload_settings(chunk_size),
        ..Config::test_default()
    }
}

/// Create a session JWT for `subject_id`.
#[allow(dead_code)]
pub fn create_test_jwt(subject_id: &str, signing_key: &[u8]) -> String {
    tube_uploader::middleware::auth::create_jwt(subject_id, signing_key).unwrap()
}

/// Deterministic, non-repeating-at-chunk-boundaries test payload.
#[allow(dead_code)]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
