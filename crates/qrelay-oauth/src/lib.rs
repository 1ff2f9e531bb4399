//! OAuth 2.0 device authorization and credential lifecycle for qrelay.
//!
//! # Components
//!
//! - [`credential`]: the persisted credential and its single-slot stores
//! - [`oauth`]: device authorization grant with PKCE, refresh-token exchange
//! - [`poll`]: the device-token polling state machine
//! - [`token_manager`]: serialized access, proactive and forced refresh

pub mod credential;
pub mod error;
pub mod oauth;
pub mod poll;
pub mod token_manager;

pub use credential::{
    Credential, CredentialStore, DEFAULT_CREDENTIAL_PATH, FileCredentialStore,
    MemoryCredentialStore,
};
pub use error::{OAuthError, Result};
pub use oauth::{DeviceAuthenticator, OAuthConfig, PkceChallenge, PromptHandler, VerificationPrompt};
pub use poll::{DevicePoller, PollOutcome, PollState};
pub use token_manager::{
    CredentialStatus, DEFAULT_REFRESH_MARGIN, SharedTokenManager, TokenManager,
};
