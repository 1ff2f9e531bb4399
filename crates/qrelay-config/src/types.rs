//! Configuration file types.
//!
//! Every field is optional so that layers can be merged field by field. The
//! binary fills in defaults for whatever is still unset after all layers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Keep `self` unless `other` sets the field.
macro_rules! merge_fields {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )+
    };
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSection,
    pub credentials: CredentialsSection,
    pub upstream: UpstreamSection,
    pub oauth: OAuthSection,
}

impl RelayConfig {
    /// Parse a TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: RelayConfig) {
        self.server.merge(other.server);
        self.credentials.merge(other.credentials);
        self.upstream.merge(other.upstream);
        self.oauth.merge(other.oauth);
    }

    /// Overlay the `QRELAY_*` environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(listen) = get(ENV_LISTEN) {
            self.server.listen = Some(listen);
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.server.api_key = Some(key);
        }
        if let Some(path) = get(ENV_TOKEN_PATH) {
            self.credentials.path = Some(PathBuf::from(path));
        }
        if let Some(agent) = get(ENV_USER_AGENT) {
            self.upstream.user_agent = Some(agent);
        }
    }

    /// The caller API key, which must be set before serving.
    pub fn require_api_key(&self) -> Result<&str> {
        self.server
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                field: "api_key".to_string(),
                context: format!("[server] (or set {ENV_API_KEY})"),
            })
    }
}

/// Listen address.
pub const ENV_LISTEN: &str = "QRELAY_LISTEN";
/// Caller API key.
pub const ENV_API_KEY: &str = "QRELAY_API_KEY";
/// Credential file path.
pub const ENV_TOKEN_PATH: &str = "QRELAY_TOKEN_PATH";
/// Upstream identification string.
pub const ENV_USER_AGENT: &str = "QRELAY_USER_AGENT";

/// `[server]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// `host:port`, or `:port` for all interfaces.
    pub listen: Option<String>,
    /// Token callers must present.
    pub api_key: Option<String>,
    pub max_body_size: Option<usize>,
}

impl ServerSection {
    fn merge(&mut self, other: ServerSection) {
        merge_fields!(self, other, listen, api_key, max_body_size);
    }
}

/// `[credentials]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    /// Credential file.
    pub path: Option<PathBuf>,
    pub refresh_margin_secs: Option<u64>,
}

impl CredentialsSection {
    fn merge(&mut self, other: CredentialsSection) {
        merge_fields!(self, other, path, refresh_margin_secs);
    }
}

/// `[upstream]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub user_agent: Option<String>,
    /// Relay chat completions without a timeout.
    pub chat_streaming: Option<bool>,
    /// Timeout for non-streaming routes.
    pub timeout_secs: Option<u64>,
    pub vision_model: Option<String>,
    pub dedupe_stream_lines: Option<bool>,
    pub forward_all_v1: Option<bool>,
}

impl UpstreamSection {
    fn merge(&mut self, other: UpstreamSection) {
        merge_fields!(
            self,
            other,
            user_agent,
            chat_streaming,
            timeout_secs,
            vision_model,
            dedupe_stream_lines,
            forward_all_v1,
        );
    }
}

/// `[oauth]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    pub client_id: Option<String>,
    pub device_code_url: Option<String>,
    pub token_url: Option<String>,
    pub scope: Option<String>,
    pub default_resource_url: Option<String>,
}

impl OAuthSection {
    fn merge(&mut self, other: OAuthSection) {
        merge_fields!(
            self,
            other,
            client_id,
            device_code_url,
            token_url,
            scope,
            default_resource_url,
        );
    }
}

/// Parse a listen address.
///
/// Accepts `ip:port`, `hostname:port` (resolved, first address wins), or
/// `:port` meaning every interface.
pub fn parse_listen_addr(listen: &str) -> Result<SocketAddr> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "listen".to_string(),
        reason,
    };

    if let Some(port) = listen.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| invalid(format!("'{listen}' has an invalid port")))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    if let Ok(addr) = listen.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // host:port with a hostname
    listen
        .to_socket_addrs()
        .map_err(|e| invalid(format!("'{listen}': {e}")))?
        .next()
        .ok_or_else(|| invalid(format!("'{listen}' did not resolve to an address")))
}
