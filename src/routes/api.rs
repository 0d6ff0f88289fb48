// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{ChannelResource, VideoCategory, VideoResource};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/channel", get(get_channel))
        .route("/api/videos/{id}", get(get_video))
        .route("/api/categories", get(get_categories))
}

// ─── Session ─────────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub subject_id: String,
    pub scopes: Vec<String>,
    pub can_upload: bool,
    pub access_expires_at: String,
}

/// Who is signed in. Also proves the stored credential still works.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    let credential = state
        .tokens
        .for_subject(&user.subject_id)
        .get_valid_token()
        .await?;

    Ok(Json(MeResponse {
        can_upload: credential.scopes.iter().any(|s| s == UPLOAD_SCOPE),
        subject_id: credential.subject_id,
        scopes: credential.scopes,
        access_expires_at: format_utc_rfc3339(credential.expires_at),
    }))
}

// ─── Channel & videos ────────────────────────────────────────

async fn get_channel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ChannelResource>> {
    tracing::debug!(subject_id = %user.subject_id, "Fetching channel");
    state
        .youtube
        .fetch_channel(&user.subject_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no channel for this account".to_string()))
}

async fn get_video(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoResource>> {
    if !is_plausible_video_id(&video_id) {
        return Err(AppError::BadRequest("malformed video id".to_string()));
    }

    state
        .youtube
        .fetch_video(&user.subject_id, &video_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))
}

/// YouTube ids are short URL-safe base64 strings.
fn is_plausible_video_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ─── Categories ──────────────────────────────────────────────

#[derive(Deserialize)]
struct CategoriesQuery {
    #[serde(default = "default_region")]
    region: String,
}

fn default_region() -> String {
    "US".to_string()
}

async fn get_categories(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<CategoriesQuery>,
) -> Result<Json<Vec<VideoCategory>>> {
    let region = params.region.to_ascii_uppercase();
    if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::BadRequest(
            "region must be an ISO 3166-1 alpha-2 code".to_string(),
        ));
    }

    let categories = state
        .youtube
        .list_categories(&user.subject_id, &region)
        .await?;
    Ok(Json(categories))
}
