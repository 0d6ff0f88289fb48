// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Video metadata sent with an upload, and the provider resources we read back.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Combined character budget for all tags of one video.
pub const MAX_TAGS_TOTAL_LEN: usize = 500;

/// Visibility of the uploaded video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    #[default]
    Private,
    Public,
    Unlisted,
}

/// Metadata attached to the upload-initiation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct VideoMetadata {
    #[validate(
        length(min = 1, max = 100, message = "title must be 1-100 characters"),
        custom(function = "validate_title")
    )]
    pub title: String,
    #[validate(length(max = 5000, message = "description exceeds 5000 characters"))]
    #[serde(default)]
    pub description: String,
    #[validate(custom(function = "validate_tags"))]
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(custom(function = "validate_category_id"))]
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub privacy_status: PrivacyStatus,
}

fn validate_title(title: &str) -> Result<(), validator::ValidationError> {
    if title.trim().is_empty() {
        return Err(validator::ValidationError::new("blank_title"));
    }
    if title.contains('<') || title.contains('>') {
        return Err(validator::ValidationError::new("angle_brackets_in_title"));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), validator::ValidationError> {
    let total: usize = tags.iter().map(|t| t.chars().count()).sum();
    if total > MAX_TAGS_TOTAL_LEN {
        return Err(validator::ValidationError::new("tags_too_long"));
    }
    Ok(())
}

fn validate_category_id(category_id: &str) -> Result<(), validator::ValidationError> {
    if category_id.is_empty() || !category_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(validator::ValidationError::new("category_id_not_numeric"));
    }
    Ok(())
}

impl VideoMetadata {
    /// Split a comma-separated tag list, dropping blanks.
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    /// Validate into the domain error type.
    pub fn check(&self) -> Result<(), ValidationError> {
        self.validate()
            .map_err(|e| ValidationError::InvalidMetadata(e.to_string()))
    }

    /// JSON body of the initiation request.
    pub fn to_resource(&self) -> serde_json::Value {
        let mut snippet = serde_json::json!({
            "title": self.title,
            "description": self.description,
            "tags": self.tags,
        });
        if let Some(category_id) = &self.category_id {
            snippet["categoryId"] = serde_json::Value::String(category_id.clone());
        }
        serde_json::json!({
            "snippet": snippet,
            "status": { "privacyStatus": self.privacy_status },
        })
    }
}

/// A video created by a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedVideo {
    pub id: String,
}

impl UploadedVideo {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// Thumbnail set returned by the Data API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

/// Counters are strings in the Data API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub like_count: Option<String>,
}

/// Video resource (`videos.list`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResource {
    pub id: String,
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub statistics: Option<VideoStatistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<String>,
    #[serde(default)]
    pub video_count: Option<String>,
}

/// The signed-in user's channel (`channels.list?mine=true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResource {
    pub id: String,
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

/// Category assignable to uploads in a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCategory {
    pub id: String,
    pub title: String,
}

/// Envelope of Data API list responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
