//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9527;

/// Model that image-bearing chat requests are redirected to.
pub const DEFAULT_VISION_MODEL: &str = "vision-model";

/// Identification string sent upstream in place of the caller's `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = "QwenCode/0.4.0 (linux; x64)";

/// Timeout for non-streaming upstream calls (5 minutes).
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Default max body size for inbound requests (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// How requests are sent upstream and relayed back.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Overrides the caller's `User-Agent`.
    pub user_agent: String,

    /// Bounded timeout for routes that are not streaming-capable.
    pub upstream_timeout: Duration,

    /// Drop an event-stream line identical to the one just before it.
    pub dedupe_stream_lines: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            dedupe_stream_lines: true,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Token callers must present as `Authorization: Bearer <token>`.
    pub api_key: String,

    /// Model substituted when a chat request carries an image part.
    pub vision_model: String,

    /// Whether chat completions are relayed without a timeout.
    pub chat_streaming: bool,

    /// Forward any other `/v1/*` path as well.
    pub forward_all_v1: bool,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,

    /// Upstream request settings.
    pub forward: ForwardConfig,
}

impl ServerConfig {
    /// Create a config that accepts callers presenting `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_key: api_key.into(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            chat_streaming: true,
            forward_all_v1: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            forward: ForwardConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    /// Enable or disable unbounded relay for chat completions.
    pub fn with_chat_streaming(mut self, enabled: bool) -> Self {
        self.chat_streaming = enabled;
        self
    }

    /// Enable or disable the catch-all `/v1/*` forward route.
    pub fn with_forward_all_v1(mut self, enabled: bool) -> Self {
        self.forward_all_v1 = enabled;
        self
    }

    /// Set the maximum inbound body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Replace the upstream request settings.
    pub fn with_forward(mut self, forward: ForwardConfig) -> Self {
        self.forward = forward;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("secret");
        assert_eq!(config.bind_address.port(), 9527);
        assert!(config.bind_address.ip().is_unspecified());
        assert_eq!(config.vision_model, "vision-model");
        assert!(config.chat_streaming);
        assert!(!config.forward_all_v1);
        assert!(config.forward.dedupe_stream_lines);
        assert_eq!(config.forward.user_agent, "QwenCode/0.4.0 (linux; x64)");
    }

    #[test]
    fn test_builders() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::new("k")
            .with_bind_address(addr)
            .with_vision_model("vl")
            .with_chat_streaming(false)
            .with_forward_all_v1(true)
            .with_max_body_size(1024);
        assert_eq!(config.bind_address, addr);
        assert_eq!(config.vision_model, "vl");
        assert!(!config.chat_streaming);
        assert!(config.forward_all_v1);
        assert_eq!(config.max_body_size, 1024);
    }
}
