// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tube-Uploader API Server
//!
//! Signs users in with Google and uploads videos to their YouTube channels
//! through the resumable upload protocol.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tube_uploader::{
    config::{Config, CredentialBackend},
    db::{CredentialStore, FirestoreDb, MemoryCredentialStore},
    services::KmsService,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        backend = ?config.credential_backend,
        chunk_size = config.upload.chunk_size,
        "Starting Tube-Uploader API"
    );

    let store: Arc<dyn CredentialStore> = match config.credential_backend {
        CredentialBackend::Memory => {
            tracing::warn!("Using in-memory credential store; sign-ins do not survive restarts");
            Arc::new(MemoryCredentialStore::new())
        }
        CredentialBackend::Firestore => {
            let kms = KmsService::new(
                &config.gcp_project_id,
                &config.gcp_region,
                "token-encryption",
            )
            .await?;
            tracing::info!("KMS service initialized");
            Arc::new(FirestoreDb::new(&config.gcp_project_id, kms).await?)
        }
    };

    tokio::fs::create_dir_all(&config.upload.spool_dir).await?;

    let state = Arc::new(AppState::new(config.clone(), store)?);
    let app = tube_uploader::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tube_uploader=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
