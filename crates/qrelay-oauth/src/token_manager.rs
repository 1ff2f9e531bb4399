//! Credential lifecycle: first-run authorization, proactive refresh and
//! forced refresh after an upstream rejection.
//!
//! Every operation that reads or replaces the stored credential runs under a
//! single mutex, so concurrent requests serialize instead of racing on the
//! one slot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::credential::{Credential, CredentialStore};
use crate::error::{OAuthError, Result};
use crate::oauth::DeviceAuthenticator;

/// Credentials expiring within this window are refreshed before use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Owns the single credential slot.
#[derive(Debug)]
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    authenticator: DeviceAuthenticator,
    refresh_margin: Duration,
    lock: Mutex<()>,
}

/// Shared token manager for use across request handlers.
pub type SharedTokenManager = Arc<TokenManager>;

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, authenticator: DeviceAuthenticator) -> Self {
        Self {
            store,
            authenticator,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            lock: Mutex::new(()),
        }
    }

    /// Override the proactive refresh margin.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// Run the device flow if no credential has ever been stored.
    ///
    /// Any stored credential, even an expired one, counts as authorized; it
    /// will be refreshed on first use.
    pub async fn ensure_authorized(&self) -> Result<()> {
        let _guard = self.lock.lock().await;

        if self.store.load().await?.is_some() {
            tracing::debug!("Credential already present, skipping authorization");
            return Ok(());
        }

        tracing::info!("No stored credential, starting device authorization");
        let credential = self.authenticator.authorize().await?;
        self.store.save(&credential).await?;
        tracing::info!(expires_at = %credential.expires_at, "Device authorization complete");
        Ok(())
    }

    /// Return a usable credential, refreshing it first if it is about to expire.
    pub async fn get_credential(&self) -> Result<Credential> {
        let _guard = self.lock.lock().await;

        let credential = self.store.load().await?.ok_or(OAuthError::NoCredential)?;

        if !credential.expires_within(self.refresh_margin, Utc::now()) {
            return Ok(credential);
        }

        tracing::info!(expires_at = %credential.expires_at, "Credential near expiry, refreshing");
        self.refresh_locked(&credential).await
    }

    /// Refresh unconditionally, regardless of the local expiry estimate.
    ///
    /// Used after the upstream rejected `current`. If another caller already
    /// replaced the stored credential while this one waited for the lock, the
    /// stored copy is returned without a second exchange.
    pub async fn refresh(&self, current: &Credential) -> Result<Credential> {
        let _guard = self.lock.lock().await;

        let stored = self.store.load().await?.ok_or(OAuthError::NoCredential)?;
        if stored.access_token != current.access_token {
            tracing::debug!("Credential was refreshed concurrently, reusing it");
            return Ok(stored);
        }

        tracing::info!("Upstream rejected credential, refreshing");
        self.refresh_locked(&stored).await
    }

    /// Delete the stored credential.
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.delete().await
    }

    /// Non-secret summary of the stored credential.
    pub async fn status(&self) -> Result<Option<CredentialStatus>> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        Ok(self.store.load().await?.map(|c| {
            let remaining = c.remaining(now).num_seconds();
            CredentialStatus {
                resource_url: c.resource_url.clone(),
                token_type: c.token_type.clone(),
                expires_at: c.expires_at,
                expires_in_secs: remaining.max(0) as u64,
                needs_refresh: c.expires_within(self.refresh_margin, now),
            }
        }))
    }

    /// Exchange and persist. Caller must hold `self.lock`.
    async fn refresh_locked(&self, current: &Credential) -> Result<Credential> {
        match self.authenticator.refresh(current).await {
            Ok(refreshed) => {
                self.store.save(&refreshed).await?;
                tracing::info!(expires_at = %refreshed.expires_at, "Credential refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh failed, clearing stored credential");
                if let Err(delete_err) = self.store.delete().await {
                    tracing::error!(error = %delete_err, "Failed to clear stored credential");
                }
                Err(match e {
                    OAuthError::RefreshFailed(_) => e,
                    other => OAuthError::RefreshFailed(other.to_string()),
                })
            }
        }
    }
}

/// Information about the stored credential for display.
#[derive(Debug, Clone)]
pub struct CredentialStatus {
    pub resource_url: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: u64,
    pub needs_refresh: bool,
}

impl CredentialStatus {
    pub fn expires_in_display(&self) -> String {
        if self.expires_in_secs == 0 {
            "Expired (will refresh on next use)".to_string()
        } else {
            let hours = self.expires_in_secs / 3600;
            let minutes = (self.expires_in_secs % 3600) / 60;
            format!("{}h {}m", hours, minutes)
        }
    }
}
