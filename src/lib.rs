// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Tube-Uploader: resilient YouTube uploads on behalf of signed-in users
//!
//! This crate keeps each user's Google OAuth credential usable across long
//! transfers and drives the resumable upload protocol through transient
//! network failures.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
pub mod upload;

use config::Config;
use db::CredentialStore;
use services::{GoogleClient, TokenRefreshers, UploadJobs, YouTubeService};
use std::sync::Arc;
use upload::{RetryPolicy, Uploader};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub google: GoogleClient,
    pub tokens: Arc<TokenRefreshers>,
    pub youtube: YouTubeService,
    pub jobs: Arc<UploadJobs>,
}

impl AppState {
    /// Wire the services together around a credential store.
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let google = GoogleClient::new(
            http,
            config.endpoints.clone(),
            config.google_client_id.clone(),
            config.google_client_secret.clone(),
        );
        let tokens = Arc::new(
            TokenRefreshers::new(google.clone(), store, config.token_expiry_skew)
                .with_retry_policy(RetryPolicy::from_settings(&config.upload)),
        );
        let youtube = YouTubeService::new(google.clone(), tokens.clone());
        let uploader = Arc::new(Uploader::new(&config.endpoints, config.upload.clone())?);

        Ok(Self {
            jobs: Arc::new(UploadJobs::new(uploader)),
            config,
            google,
            tokens,
            youtube,
        })
    }
}
