// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Upload routes: submit a video, poll its progress, abort it.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{PrivacyStatus, UploadJobView, VideoMetadata};
use crate::AppState;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const FALLBACK_CONTENT_TYPE: &str = "video/*";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/uploads",
            get(list_uploads)
                .post(create_upload)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/uploads/{id}", get(get_upload).delete(abort_upload))
}

/// Metadata travels in the query string; the body is the raw media.
#[derive(Deserialize)]
struct UploadParams {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    /// Comma-separated
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    privacy_status: PrivacyStatus,
}

impl UploadParams {
    fn into_metadata(self) -> VideoMetadata {
        VideoMetadata {
            title: self.title,
            description: self.description,
            tags: self
                .tags
                .as_deref()
                .map(VideoMetadata::parse_tags)
                .unwrap_or_default(),
            category_id: self.category_id.filter(|c| !c.is_empty()),
            privacy_status: self.privacy_status,
        }
    }
}

/// Media types accepted as-is; anything else is sent as `video/*`.
fn media_content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ct.starts_with("video/"))
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

/// Start an upload. Responds once the provider session exists; the
/// transfer continues in the background.
async fn create_upload(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<UploadJobView>)> {
    let metadata = params.into_metadata();
    // Reject bad metadata before reading the body.
    metadata
        .check()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let content_type = media_content_type(&headers).to_string();

    let id = Uuid::new_v4();
    let (spool_path, size) = state.jobs.spool(id, body.into_data_stream()).await?;
    tracing::info!(
        upload_id = %id,
        subject_id = %user.subject_id,
        size,
        content_type = %content_type,
        "Upload received"
    );

    let view = state
        .jobs
        .submit(
            id,
            state.tokens.for_subject(&user.subject_id),
            metadata,
            spool_path,
            &content_type,
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(view)))
}

async fn list_uploads(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<Vec<UploadJobView>> {
    Json(state.jobs.list(&user.subject_id))
}

async fn get_upload(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadJobView>> {
    state
        .jobs
        .get(id, &user.subject_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("upload {}", id)))
}

async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<UploadJobView>)> {
    let view = state
        .jobs
        .abort(id, &user.subject_id)
        .ok_or_else(|| AppError::NotFound(format!("upload {}", id)))?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}
