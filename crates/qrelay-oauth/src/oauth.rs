//! OAuth 2.0 device authorization grant with PKCE (RFC 8628 + RFC 7636).

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngCore;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::credential::Credential;
use crate::error::{OAuthError, Result};
use crate::poll::{DevicePoller, PollOutcome};

/// Grant type sent while polling for the device token.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// OAuth configuration for the upstream provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub device_code_url: String,
    pub token_url: String,
    pub scope: String,
    /// Upstream host used when the token response carries no `resource_url`.
    pub default_resource_url: String,
    /// Initial delay between device-token polls.
    pub poll_interval: Duration,
    /// Minimum delay after the provider answers `slow_down`.
    pub slow_down_floor: Duration,
    /// Timeout for each individual request to the provider.
    pub request_timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::qwen()
    }
}

impl OAuthConfig {
    /// OAuth config for the Qwen chat device flow.
    pub fn qwen() -> Self {
        Self {
            client_id: "f0304373b74a44d2b584a3fb70ca9e56".to_string(),
            device_code_url: "https://chat.qwen.ai/api/v1/oauth2/device/code".to_string(),
            token_url: "https://chat.qwen.ai/api/v1/oauth2/token".to_string(),
            scope: "openid profile email model.completion".to_string(),
            default_resource_url: "portal.qwen.ai".to_string(),
            poll_interval: Duration::from_secs(2),
            slow_down_floor: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// S256 code challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Fresh version-4 UUID for the `x-request-id` header.
pub fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What the operator needs to approve the device.
#[derive(Debug, Clone)]
pub struct VerificationPrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    /// Seconds the user has to approve.
    pub expires_in: u64,
}

impl VerificationPrompt {
    /// URL to show the user, preferring the one with the code pre-filled.
    pub fn url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.verification_uri)
    }
}

/// Callback that surfaces the verification URL to the operator.
pub type PromptHandler = Arc<dyn Fn(&VerificationPrompt) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    #[serde(default)]
    user_code: String,
    #[serde(default)]
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    resource_url: Option<String>,
}

impl TokenResponse {
    /// Turn a token response into a complete credential.
    ///
    /// Fields the provider omits on refresh are carried over from `previous`.
    fn into_credential(
        self,
        previous: Option<&Credential>,
        default_resource_url: &str,
    ) -> std::result::Result<Credential, String> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or("token response has no access_token")?;
        let expires_in = self.expires_in.ok_or("token response has no expires_in")?;
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or("token response has no refresh_token")?;
        let resource_url = self
            .resource_url
            .filter(|u| !u.is_empty())
            .or_else(|| previous.map(|p| p.resource_url.clone()))
            .unwrap_or_else(|| default_resource_url.to_string());
        let token_type = self
            .token_type
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.token_type.clone()))
            .unwrap_or_else(|| "Bearer".to_string());

        let issued_at = Utc::now();
        if Credential::expiry(issued_at, expires_in).is_none() {
            return Err(format!("token response expires_in out of range: {expires_in}"));
        }

        Ok(Credential::issued(
            access_token,
            token_type,
            refresh_token,
            expires_in,
            resource_url,
            issued_at,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Answer to one device-token poll.
enum TokenPoll {
    Pending,
    SlowDown,
    Granted(TokenResponse),
    Denied(String),
}

/// Describe a non-2xx provider response.
async fn describe_failure(response: reqwest::Response) -> (Option<ErrorResponse>, String) {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => {
            let detail = if err.error_description.is_empty() {
                format!("code: {}", err.error)
            } else {
                format!("code: {} description: {}", err.error, err.error_description)
            };
            (Some(err), detail)
        }
        Err(_) => (None, format!("HTTP {}: {}", status, body)),
    }
}

/// Runs the device authorization grant and refresh-token exchanges.
#[derive(Clone)]
pub struct DeviceAuthenticator {
    client: Client,
    config: OAuthConfig,
    prompt: PromptHandler,
}

impl std::fmt::Debug for DeviceAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthenticator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceAuthenticator {
    /// Create an authenticator that logs the verification URL.
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            prompt: Arc::new(|prompt: &VerificationPrompt| {
                tracing::info!(
                    url = %prompt.url(),
                    user_code = %prompt.user_code,
                    expires_in = prompt.expires_in,
                    "Open the authorization URL to approve this device"
                );
            }),
        }
    }

    /// Replace the handler that presents the verification URL.
    pub fn with_prompt(mut self, prompt: PromptHandler) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Run the full device flow and return a freshly issued credential.
    pub async fn authorize(&self) -> Result<Credential> {
        let pkce = PkceChallenge::generate();

        let response = self
            .post_form(
                &self.config.device_code_url,
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("scope", self.config.scope.as_str()),
                    ("code_challenge", pkce.challenge.as_str()),
                    ("code_challenge_method", "S256"),
                ],
            )
            .await
            .map_err(|e| {
                OAuthError::AuthorizationFailed(format!(
                    "Unable to send device code authorization request: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let (_, detail) = describe_failure(response).await;
            return Err(OAuthError::AuthorizationFailed(format!(
                "Device code request rejected: {}",
                detail
            )));
        }

        let device: DeviceCodeResponse = response.json().await.map_err(|e| {
            OAuthError::AuthorizationFailed(format!("Failed to parse device code response: {}", e))
        })?;

        (self.prompt)(&VerificationPrompt {
            user_code: device.user_code.clone(),
            verification_uri: device.verification_uri.clone(),
            verification_uri_complete: device.verification_uri_complete.clone(),
            expires_in: device.expires_in,
        });

        self.poll_device_token(&device, &pkce.verifier).await
    }

    async fn poll_device_token(
        &self,
        device: &DeviceCodeResponse,
        verifier: &str,
    ) -> Result<Credential> {
        let window = Duration::from_secs(device.expires_in);
        let mut poller = DevicePoller::new(
            self.config.poll_interval,
            self.config.slow_down_floor,
            window,
            Instant::now(),
        )
        .ok_or_else(|| {
            OAuthError::AuthorizationFailed(format!(
                "device code expires_in out of range: {}",
                device.expires_in
            ))
        })?;
        let form = [
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ("device_code", device.device_code.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        loop {
            if !poller.may_poll(Instant::now()) {
                return Err(OAuthError::AuthorizationTimedOut {
                    waited_secs: window.as_secs(),
                });
            }

            let outcome = match self.poll_token(&form).await? {
                TokenPoll::Granted(token) => {
                    poller.record(PollOutcome::Granted);
                    tracing::info!(attempts = poller.attempts(), "Device authorized");
                    return token
                        .into_credential(None, &self.config.default_resource_url)
                        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()));
                }
                TokenPoll::Denied(reason) => {
                    poller.record(PollOutcome::Denied);
                    return Err(OAuthError::AuthorizationFailed(reason));
                }
                TokenPoll::Pending => PollOutcome::Pending,
                TokenPoll::SlowDown => PollOutcome::SlowDown,
            };

            if let Some(delay) = poller.record(outcome) {
                tracing::debug!(
                    state = ?poller.state(),
                    delay_ms = delay.as_millis() as u64,
                    "Waiting for device approval"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn poll_token(&self, form: &[(&str, &str)]) -> Result<TokenPoll> {
        let response = self
            .post_form(&self.config.token_url, form)
            .await
            .map_err(|e| OAuthError::AuthorizationFailed(format!("Token poll failed: {}", e)))?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await.map_err(|e| {
                OAuthError::AuthorizationFailed(format!("Failed to parse token response: {}", e))
            })?;
            return Ok(TokenPoll::Granted(token));
        }

        let (error, detail) = describe_failure(response).await;
        Ok(match error.as_ref().map(|e| e.error.as_str()) {
            Some("authorization_pending") => TokenPoll::Pending,
            Some("slow_down") => TokenPoll::SlowDown,
            _ => TokenPoll::Denied(detail),
        })
    }

    /// Exchange the refresh token of `current` for a new credential.
    ///
    /// One request, no retry: any failure is final for this attempt.
    pub async fn refresh(&self, current: &Credential) -> Result<Credential> {
        let response = self
            .post_form(
                &self.config.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", self.config.client_id.as_str()),
                    ("refresh_token", current.refresh_token.as_str()),
                ],
            )
            .await
            .map_err(|e| OAuthError::RefreshFailed(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let (_, detail) = describe_failure(response).await;
            return Err(OAuthError::RefreshFailed(detail));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            OAuthError::RefreshFailed(format!("Failed to parse refresh response: {}", e))
        })?;

        token
            .into_credential(Some(current), &self.config.default_resource_url)
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        let request_id = request_id();
        tracing::debug!(url, request_id = %request_id, "OAuth request");

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, &request_id)
            .timeout(self.config.request_timeout)
            .form(form)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            tracing::debug!(url, request_id = %request_id, "Provider is rate limiting");
        }
        Ok(response)
    }
}
