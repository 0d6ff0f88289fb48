//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment and read
//! once at startup.

use crate::services::token::DEFAULT_EXPIRY_SKEW_SECS;
use crate::upload::protocol::CHUNK_GRANULARITY;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default upload chunk: 32 x 256 KiB = 8 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * CHUNK_GRANULARITY;

/// Which `CredentialStore` backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialBackend {
    Memory,
    Firestore,
}

/// Provider endpoints. Overridable so tests can point at a local fake.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Base for YouTube Data API reads (`{api_base}/youtube/v3/...`)
    pub api_base: String,
    /// Base for resumable uploads (`{upload_base}/upload/youtube/v3/videos`)
    pub upload_base: String,
}

impl ProviderEndpoints {
    /// Production Google endpoints.
    pub fn google() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            api_base: "https://www.googleapis.com".to_string(),
            upload_base: "https://www.googleapis.com".to_string(),
        }
    }

    /// Every endpoint served from a single base URL (local fakes).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/v1/userinfo", base),
            api_base: base.to_string(),
            upload_base: base.to_string(),
        }
    }

    fn from_env() -> Self {
        let defaults = Self::google();
        Self {
            auth_url: env::var("GOOGLE_AUTH_URL").unwrap_or(defaults.auth_url),
            token_url: env::var("GOOGLE_TOKEN_URL").unwrap_or(defaults.token_url),
            userinfo_url: env::var("GOOGLE_USERINFO_URL").unwrap_or(defaults.userinfo_url),
            api_base: env::var("YOUTUBE_API_BASE").unwrap_or(defaults.api_base),
            upload_base: env::var("YOUTUBE_UPLOAD_BASE").unwrap_or(defaults.upload_base),
        }
    }
}

/// Tunables for the resumable upload client.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Bytes per chunk; non-zero multiple of 256 KiB.
    pub chunk_size: u64,
    /// Attempts per chunk (including the first) before escalating to resync.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub base_delay: Duration,
    /// Cap on a single backoff delay.
    pub max_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Consecutive resyncs without forward progress before failing.
    pub max_resyncs: u32,
    /// Where request bodies are spooled before upload.
    pub spool_dir: PathBuf,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            max_resyncs: 5,
            spool_dir: env::temp_dir().join("tube-uploader"),
        }
    }
}

impl UploadSettings {
    /// Check invariants the protocol depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            return Err(ConfigError::Invalid(
                "UPLOAD_CHUNK_SIZE",
                format!(
                    "{} is not a non-zero multiple of {}",
                    self.chunk_size, CHUNK_GRANULARITY
                ),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "UPLOAD_MAX_ATTEMPTS",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Google OAuth client ID (public)
    pub google_client_id: String,
    /// Frontend URL for OAuth redirects
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (KMS key location)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Credential persistence backend
    pub credential_backend: CredentialBackend,
    /// Access tokens are treated as expired this long before their expiry
    pub token_expiry_skew: chrono::Duration,
    pub endpoints: ProviderEndpoints,
    pub upload: UploadSettings,

    // --- Secrets ---
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for the OAuth state parameter
    pub oauth_state_key: Vec<u8>,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            google_client_id: "test_client_id".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            credential_backend: CredentialBackend::Memory,
            token_expiry_skew: chrono::Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS),
            endpoints: ProviderEndpoints::google(),
            upload: UploadSettings::default(),
            google_client_secret: "test_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_oauth_state_key".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = UploadSettings::default();
        let upload = UploadSettings {
            chunk_size: parse_var("UPLOAD_CHUNK_SIZE", defaults.chunk_size)?,
            max_attempts: parse_var("UPLOAD_MAX_ATTEMPTS", defaults.max_attempts)?,
            request_timeout: Duration::from_secs(parse_var(
                "UPLOAD_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            max_resyncs: parse_var("UPLOAD_MAX_RESYNCS", defaults.max_resyncs)?,
            spool_dir: env::var("UPLOAD_SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.spool_dir),
            ..defaults
        };
        upload.validate()?;

        let credential_backend = match env::var("CREDENTIAL_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .as_str()
        {
            "memory" => CredentialBackend::Memory,
            "firestore" => CredentialBackend::Firestore,
            other => {
                return Err(ConfigError::Invalid(
                    "CREDENTIAL_BACKEND",
                    format!("unknown backend '{}'", other),
                ))
            }
        };

        Ok(Self {
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("GOOGLE_CLIENT_ID"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            credential_backend,
            token_expiry_skew: chrono::Duration::seconds(parse_var(
                "TOKEN_EXPIRY_SKEW_SECS",
                DEFAULT_EXPIRY_SKEW_SECS,
            )?),
            endpoints: ProviderEndpoints::from_env(),
            upload,

            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("GOOGLE_CLIENT_SECRET"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
