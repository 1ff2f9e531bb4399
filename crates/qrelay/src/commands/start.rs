//! Start command - runs the proxy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use qrelay_config::{RelayConfig, parse_listen_addr};
use qrelay_server::{ForwardConfig, Server, ServerConfig};
use tracing::info;

use super::{Context, credential_path, token_manager};

/// Listen address when none is configured.
const DEFAULT_LISTEN: &str = ":9527";

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to listen on, `host:port` or `:port` (overrides config)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Key callers must present as a bearer token (overrides config)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Credential file (overrides config)
    #[arg(long)]
    pub token_path: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(listen) = args.listen {
        config.server.listen = Some(listen);
    }
    if let Some(key) = args.api_key {
        config.server.api_key = Some(key);
    }

    let server_config = server_config(&config)?;
    let path = credential_path(&config, args.token_path.as_deref());

    let tokens = Arc::new(token_manager(&config, path.clone()));
    tokens
        .ensure_authorized()
        .await
        .context("Device authorization failed")?;

    info!(
        credentials = %path.display(),
        vision_model = %server_config.vision_model,
        "Upstream credential ready"
    );

    Server::new(server_config, tokens)
        .run_with_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Build the server configuration, filling defaults for unset fields.
pub fn server_config(config: &RelayConfig) -> Result<ServerConfig> {
    let api_key = config.require_api_key()?;
    let listen = config.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
    let bind_address = parse_listen_addr(listen)?;

    let upstream = &config.upstream;
    let defaults = ServerConfig::new(api_key);
    let mut forward = ForwardConfig::default();
    if let Some(agent) = &upstream.user_agent {
        forward.user_agent = agent.clone();
    }
    if let Some(secs) = upstream.timeout_secs {
        forward.upstream_timeout = Duration::from_secs(secs);
    }
    if let Some(dedupe) = upstream.dedupe_stream_lines {
        forward.dedupe_stream_lines = dedupe;
    }

    let server = ServerConfig::new(api_key)
        .with_bind_address(bind_address)
        .with_vision_model(
            upstream
                .vision_model
                .clone()
                .unwrap_or(defaults.vision_model),
        )
        .with_chat_streaming(upstream.chat_streaming.unwrap_or(defaults.chat_streaming))
        .with_forward_all_v1(upstream.forward_all_v1.unwrap_or(defaults.forward_all_v1))
        .with_max_body_size(config.server.max_body_size.unwrap_or(defaults.max_body_size))
        .with_forward(forward);

    Ok(server)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrelay_config::ConfigError;

    fn with_key() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.server.api_key = Some("secret".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let server = server_config(&with_key()).unwrap();
        assert_eq!(server.api_key, "secret");
        assert_eq!(server.bind_address.port(), 9527);
        assert!(server.bind_address.ip().is_unspecified());
        assert_eq!(server.vision_model, "vision-model");
        assert!(server.chat_streaming);
        assert!(!server.forward_all_v1);
        assert_eq!(server.forward.upstream_timeout, Duration::from_secs(300));
        assert_eq!(server.forward.user_agent, "QwenCode/0.4.0 (linux; x64)");
    }

    #[test]
    fn test_overrides() {
        let mut config = with_key();
        config.server.listen = Some("127.0.0.1:8001".to_string());
        config.upstream.user_agent = Some("agent/2".to_string());
        config.upstream.timeout_secs = Some(5);
        config.upstream.chat_streaming = Some(false);
        config.upstream.dedupe_stream_lines = Some(false);
        config.upstream.vision_model = Some("vl-max".to_string());

        let server = server_config(&config).unwrap();
        assert_eq!(server.bind_address.to_string(), "127.0.0.1:8001");
        assert_eq!(server.forward.user_agent, "agent/2");
        assert_eq!(server.forward.upstream_timeout, Duration::from_secs(5));
        assert!(!server.chat_streaming);
        assert!(!server.forward.dedupe_stream_lines);
        assert_eq!(server.vision_model, "vl-max");
    }

    #[test]
    fn test_missing_api_key() {
        let err = server_config(&RelayConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_invalid_listen() {
        let mut config = with_key();
        config.server.listen = Some("nowhere".to_string());
        assert!(server_config(&config).is_err());
    }
}
