//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wiremock::MockServer;

use qrelay_oauth::{
    Credential, CredentialStore, DeviceAuthenticator, FileCredentialStore, OAuthConfig,
    TokenManager,
};
use qrelay_server::{Server, ServerConfig};

/// Key callers present to the proxy in tests.
pub const API_KEY: &str = "test-key";

/// Access token stored before each test.
pub const INITIAL_TOKEN: &str = "old-access";

/// Access token handed out by the mock token endpoint.
pub const REFRESHED_TOKEN: &str = "new-access";

/// A mock provider plus a credential file pointing at it.
///
/// The same mock server plays both the upstream API (`/v1/...`) and the OAuth
/// token endpoint (`/token`).
pub struct Fixture {
    pub upstream: MockServer,
    pub store: Arc<FileCredentialStore>,
    pub tokens: Arc<TokenManager>,
    pub temp_dir: TempDir,
}

impl Fixture {
    /// Stored credential valid for an hour.
    pub async fn new() -> Result<Self> {
        Self::with_lifetime(3600).await
    }

    /// Stored credential expiring `expires_in` seconds from now.
    pub async fn with_lifetime(expires_in: u64) -> Result<Self> {
        let upstream = MockServer::start().await;
        Self::with_resource(upstream, None, expires_in).await
    }

    /// Credential whose upstream is `resource_url` instead of the mock server.
    pub async fn with_resource_url(resource_url: &str) -> Result<Self> {
        let upstream = MockServer::start().await;
        Self::with_resource(upstream, Some(resource_url.to_string()), 3600).await
    }

    async fn with_resource(
        upstream: MockServer,
        resource_url: Option<String>,
        expires_in: u64,
    ) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileCredentialStore::new(temp_dir.path().join("token.json")));

        let credential = Credential::issued(
            INITIAL_TOKEN,
            "Bearer",
            "refresh-1",
            expires_in,
            resource_url.unwrap_or_else(|| upstream.uri()),
            Utc::now(),
        );
        store.save(&credential).await?;

        let oauth = OAuthConfig {
            device_code_url: format!("{}/device/code", upstream.uri()),
            token_url: format!("{}/token", upstream.uri()),
            ..OAuthConfig::default()
        };
        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            DeviceAuthenticator::new(oauth),
        ));

        Ok(Self {
            upstream,
            store,
            tokens,
            temp_dir,
        })
    }

    /// Server config accepting [`API_KEY`].
    pub fn config(&self) -> ServerConfig {
        ServerConfig::new(API_KEY)
    }

    /// The stored access token, if any.
    pub async fn stored_token(&self) -> Option<String> {
        self.store
            .load()
            .await
            .ok()
            .flatten()
            .map(|c| c.access_token)
    }
}

/// A proxy server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a proxy for `fixture` with the given configuration.
    pub async fn start(fixture: &Fixture, config: ServerConfig) -> Result<Self> {
        let addr = find_available_port().await?;
        let server = Server::new(config.with_bind_address(addr), fixture.tokens.clone());

        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            _handle: handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get an authenticated GET request builder.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .bearer_auth(API_KEY)
    }

    /// Get an authenticated POST request builder.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .bearer_auth(API_KEY)
    }
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
