//! Credential persistence.
//!
//! `CredentialStore` is deliberately dumb: load, save, remove. All token
//! lifecycle decisions live in `services::token`.

pub mod firestore;
pub mod memory;

use crate::error::StoreError;
use crate::models::Credential;
use async_trait::async_trait;

pub use firestore::FirestoreDb;
pub use memory::MemoryCredentialStore;

/// Collection names as constants.
pub mod collections {
    /// OAuth credentials (keyed by subject id)
    pub const CREDENTIALS: &str = "credentials";
}

/// Storage for the one credential record each subject owns.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential for a subject, if any.
    async fn load(&self, subject_id: &str) -> Result<Option<Credential>, StoreError>;

    /// Insert or replace the subject's credential.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Forget the subject's credential (sign-out or revoked grant).
    async fn remove(&self, subject_id: &str) -> Result<(), StoreError>;
}
