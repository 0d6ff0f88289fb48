// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed credential store.
//!
//! Tokens are encrypted with Cloud KMS before they are written; the expiry
//! is stored as an RFC 3339 string.

use super::CredentialStore;
use crate::db::collections;
use crate::error::{AppError, StoreError};
use crate::models::{Credential, StoredCredential};
use crate::services::kms::{decrypt_tokens, encrypt_tokens, KmsService};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use async_trait::async_trait;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
    kms: KmsService,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, kms: KmsService) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, kms).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
            kms,
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, kms: KmsService) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            kms,
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock(kms: KmsService) -> Self {
        Self { client: None, kms }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError("Database not connected (offline mode)".to_string()))
    }

    /// Encrypt a credential into its stored form.
    pub async fn seal(&self, credential: &Credential) -> Result<StoredCredential, StoreError> {
        let (access, refresh) = encrypt_tokens(
            &self.kms,
            &credential.access_token,
            &credential.refresh_token,
            &credential.subject_id,
        )
        .await
        .map_err(|e| StoreError(e.to_string()))?;

        Ok(StoredCredential {
            subject_id: credential.subject_id.clone(),
            access_token_encrypted: access,
            refresh_token_encrypted: refresh,
            expires_at: format_utc_rfc3339(credential.expires_at),
            scopes: credential.scopes.clone(),
        })
    }

    /// Decrypt a stored credential.
    pub async fn open(&self, stored: StoredCredential) -> Result<Credential, StoreError> {
        let (access_token, refresh_token) = decrypt_tokens(
            &self.kms,
            &stored.access_token_encrypted,
            &stored.refresh_token_encrypted,
            &stored.subject_id,
        )
        .await
        .map_err(|e| StoreError(e.to_string()))?;

        let expires_at = parse_utc_rfc3339(&stored.expires_at)
            .map_err(|e| StoreError(format!("Failed to parse expiry: {}", e)))?;

        Ok(Credential {
            subject_id: stored.subject_id,
            access_token,
            refresh_token,
            expires_at,
            scopes: stored.scopes,
        })
    }
}

#[async_trait]
impl CredentialStore for FirestoreDb {
    async fn load(&self, subject_id: &str) -> Result<Option<Credential>, StoreError> {
        let stored: Option<StoredCredential> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(subject_id)
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        match stored {
            Some(stored) => Ok(Some(self.open(stored).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let stored = self.seal(credential).await?;
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(&credential.subject_id)
            .object(&stored)
            .execute()
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, subject_id: &str) -> Result<(), StoreError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::CREDENTIALS)
            .document_id(subject_id)
            .execute()
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }
}
