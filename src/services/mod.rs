// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod google;
pub mod jobs;
pub mod kms;
pub mod token;

pub use google::{GoogleClient, TokenResponse, UserInfo, YouTubeService};
pub use jobs::UploadJobs;
pub use kms::KmsService;
pub use token::{TokenRefresher, TokenRefreshers};
