//! Application state shared across handlers.

use std::sync::Arc;

use qrelay_oauth::SharedTokenManager;

use crate::config::ServerConfig;
use crate::forward::Forwarder;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Upstream forwarding engine.
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    /// Create the state, wiring the forwarder to `tokens`.
    pub fn new(config: ServerConfig, tokens: SharedTokenManager) -> Self {
        let forwarder = Forwarder::new(tokens, config.forward.clone());
        Self {
            config: Arc::new(config),
            forwarder: Arc::new(forwarder),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
