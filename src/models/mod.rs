// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod upload;
pub mod video;

pub use credential::{Credential, StoredCredential};
pub use upload::{UploadJobView, UploadSnapshot, UploadStatus};
pub use video::{
    ChannelResource, PrivacyStatus, UploadedVideo, VideoCategory, VideoMetadata, VideoResource,
};
