//! Error types for the credential lifecycle.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors that can occur while authorizing, refreshing or storing credentials.
///
/// Messages never include token material.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// No credential has been stored yet (or it was cleared after a failed refresh).
    #[error("No credential available. Run 'qrelay auth login' to authorize.")]
    NoCredential,

    /// The device authorization flow was rejected or could not complete.
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// The device authorization window elapsed before the user approved.
    #[error("Authorization timed out: no device token received after {waited_secs}s")]
    AuthorizationTimedOut { waited_secs: u64 },

    /// The provider rejected a refresh-token exchange. The stored credential is gone.
    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),

    /// Network/HTTP error talking to the provider.
    #[error("Network error: {0}")]
    Network(String),

    /// Credential file could not be read, written or removed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Network(e.to_string())
    }
}
