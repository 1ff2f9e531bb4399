//! Authenticating OpenAI-compatible reverse proxy.
//!
//! Callers present a static API key; requests are forwarded to the upstream
//! named by the managed OAuth credential, with the upstream bearer token
//! injected.
//!
//! # Example
//!
//! ```ignore
//! use qrelay_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::new("caller-key")
//!     .with_bind_address("127.0.0.1:9527".parse()?);
//!
//! let server = Server::new(config, token_manager);
//! server.run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod content_router;
pub mod error;
pub mod forward;
pub mod relay;
pub mod routes;
pub mod state;

pub use auth::auth_middleware;
pub use config::{ForwardConfig, ServerConfig};
pub use content_router::{RouteDecision, RouteError, RoutedRequest, route_request};
pub use error::{ErrorBody, ErrorEnvelope, ProxyError, Result, ServerError};
pub use forward::{Forwarder, InboundRequest, UpstreamOutcome};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get, post},
};
use qrelay_oauth::SharedTokenManager;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The qrelay HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server forwarding with credentials from `tokens`.
    pub fn new(config: ServerConfig, tokens: SharedTokenManager) -> Self {
        Self {
            state: AppState::new(config, tokens),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            .merge(self.api_routes())
            .layer(DefaultBodyLimit::max(self.state.config.max_body_size))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// `/v1` routes, all behind the auth middleware.
    fn api_routes(&self) -> Router<AppState> {
        let mut router = Router::new()
            .route("/v1/models", get(routes::models_handler))
            .route(
                "/v1/chat/completions",
                post(routes::chat_completions_handler),
            );

        if self.state.config.forward_all_v1 {
            router = router.route("/v1/{*path}", any(routes::forward_handler));
        }

        router.route_layer(middleware::from_fn_with_state(
            self.state.clone(),
            auth::auth_middleware,
        ))
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_address;
        let router = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            "Proxy listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
