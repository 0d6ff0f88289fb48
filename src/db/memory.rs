// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process credential store.

use super::CredentialStore;
use crate::error::StoreError;
use crate::models::Credential;
use async_trait::async_trait;
use dashmap::DashMap;

/// Credentials kept in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: DashMap<String, Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, subject_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.get(subject_id).map(|c| c.clone()))
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.credentials
            .insert(credential.subject_id.clone(), credential.clone());
        Ok(())
    }

    async fn remove(&self, subject_id: &str) -> Result<(), StoreError> {
        self.credentials.remove(subject_id);
        Ok(())
    }
}
