//! The persisted device-flow credential and the single-slot stores that hold it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{OAuthError, Result};

/// Default credential file, relative to the working directory.
pub const DEFAULT_CREDENTIAL_PATH: &str = "./data/token.json";

// ============================================================================
// Credential
// ============================================================================

/// An OAuth2 device-flow credential.
///
/// A stored credential is always fully populated. `expires_at` is derived from
/// the issuance time and `expires_in`, never supplied by the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    /// Issued lifetime in seconds.
    pub expires_in: u64,
    /// Upstream host the access token is valid for.
    pub resource_url: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential issued at `issued_at`, computing its absolute expiry.
    ///
    /// A lifetime past the representable range saturates; provider input goes
    /// through [`Credential::expiry`] first.
    pub fn issued(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
        resource_url: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            refresh_token: refresh_token.into(),
            expires_in,
            resource_url: resource_url.into(),
            expires_at: Self::expiry(issued_at, expires_in).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// `issued_at + expires_in` seconds, or `None` if it is out of range.
    pub fn expiry(issued_at: DateTime<Utc>, expires_in: u64) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(expires_in).ok()?;
        issued_at.checked_add_signed(chrono::TimeDelta::try_seconds(secs)?)
    }

    /// Whether every field needed to call the upstream is present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.resource_url.is_empty()
    }

    /// Time left before expiry (negative once expired).
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }

    /// True when the credential expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        self.remaining(now) <= margin
    }

    /// Value for an outbound `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Base URL of the upstream API.
    ///
    /// The provider hands out a bare host (`portal.example.com`); values that
    /// already carry a scheme are used as-is.
    pub fn base_url(&self) -> String {
        let resource = self.resource_url.trim_end_matches('/');
        if resource.contains("://") {
            resource.to_string()
        } else {
            format!("https://{}", resource)
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("resource_url", &self.resource_url)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// CredentialStore Trait
// ============================================================================

/// Durable single-slot storage for one credential.
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Load the stored credential, `None` if nothing was ever stored.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential.
    async fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove the stored credential. Removing an empty slot is not an error.
    async fn delete(&self) -> Result<()>;
}

fn ensure_complete(credential: &Credential) -> Result<()> {
    if credential.is_complete() {
        Ok(())
    } else {
        Err(OAuthError::Storage(
            "Refusing to persist a partially populated credential".to_string(),
        ))
    }
}

// ============================================================================
// FileCredentialStore
// ============================================================================

/// JSON file store.
///
/// The file is read on every `load`, so a credential written by another
/// `qrelay` process is picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the credential file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OAuthError::Storage(format!(
                    "Failed to read credential file {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let credential: Credential = serde_json::from_str(&content).map_err(|e| {
            OAuthError::Serialization(format!("Failed to parse credential file: {}", e))
        })?;

        if !credential.is_complete() {
            return Err(OAuthError::Serialization(format!(
                "Credential file {} is missing required fields",
                self.path.display()
            )));
        }

        Ok(Some(credential))
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        ensure_complete(credential)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                OAuthError::Storage(format!("Failed to create credential directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(credential).map_err(|e| {
            OAuthError::Serialization(format!("Failed to serialize credential: {}", e))
        })?;

        // Whole-file rewrite through a sibling so readers never see a torn record.
        let staging = self.staging_path();
        write_private(&staging, json.as_bytes())
            .map_err(|e| OAuthError::Storage(format!("Failed to write credential file: {}", e)))?;
        std::fs::rename(&staging, &self.path)
            .map_err(|e| OAuthError::Storage(format!("Failed to replace credential file: {}", e)))?;

        tracing::info!(path = %self.path.display(), "Credential saved");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Credential deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OAuthError::Storage(format!(
                "Failed to delete credential file: {}",
                e
            ))),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

// ============================================================================
// MemoryCredentialStore (for testing)
// ============================================================================

/// In-memory store for testing.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot.read().await.clone())
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        ensure_complete(credential)?;
        *self.slot.write().await = Some(credential.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.slot.write().await = None;
        Ok(())
    }
}
