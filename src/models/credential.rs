//! OAuth credential model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user's OAuth token pair.
///
/// `refresh_token` only changes when the token endpoint rotates it during a
/// refresh. `access_token` is usable while `now < expires_at - skew`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    /// Provider subject (Google `sub`)
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
    /// Granted OAuth scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    /// Whether the access token can still be used at `now`, keeping `skew`
    /// in reserve for requests already on the wire.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now + skew < self.expires_at
    }

    /// Whether the access token can still be used right now.
    pub fn is_fresh(&self, skew: Duration) -> bool {
        self.is_fresh_at(Utc::now(), skew)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Credential as persisted in Firestore (tokens encrypted with KMS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub subject_id: String,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64)
    pub refresh_token_encrypted: String,
    /// When the access token expires (RFC 3339)
    pub expires_at: String,
    pub scopes: Vec<String>,
}
