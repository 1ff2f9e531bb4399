//! CLI command handlers.

pub mod auth;
pub mod start;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use qrelay_config::RelayConfig;
use qrelay_oauth::{
    DEFAULT_CREDENTIAL_PATH, DEFAULT_REFRESH_MARGIN, DeviceAuthenticator, FileCredentialStore,
    OAuthConfig, TokenManager,
};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Configuration merged from files and environment.
    pub config: RelayConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Credential file, with an optional CLI override.
pub fn credential_path(config: &RelayConfig, flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.credentials.path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_PATH))
}

/// Provider settings, starting from the built-in defaults.
pub fn oauth_config(config: &RelayConfig) -> OAuthConfig {
    let section = &config.oauth;
    let mut oauth = OAuthConfig::default();
    if let Some(v) = &section.client_id {
        oauth.client_id = v.clone();
    }
    if let Some(v) = &section.device_code_url {
        oauth.device_code_url = v.clone();
    }
    if let Some(v) = &section.token_url {
        oauth.token_url = v.clone();
    }
    if let Some(v) = &section.scope {
        oauth.scope = v.clone();
    }
    if let Some(v) = &section.default_resource_url {
        oauth.default_resource_url = v.clone();
    }
    oauth
}

/// Token manager over the credential file at `path`.
pub fn token_manager(config: &RelayConfig, path: PathBuf) -> TokenManager {
    let store = Arc::new(FileCredentialStore::new(path));
    let authenticator =
        DeviceAuthenticator::new(oauth_config(config)).with_prompt(Arc::new(auth::print_prompt));
    let margin = config
        .credentials
        .refresh_margin_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REFRESH_MARGIN);

    TokenManager::new(store, authenticator).with_refresh_margin(margin)
}
