//! qrelay - authenticating OpenAI-compatible proxy for the Qwen chat API
//!
//! Main entry point for the qrelay CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{auth, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// qrelay - authenticating OpenAI-compatible proxy for the Qwen chat API
#[derive(Parser)]
#[command(name = "qrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file (replaces ./qrelay.toml)
    #[arg(long, global = true, env = "QRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize if needed, then run the proxy
    Start(start::StartArgs),

    /// Upstream credential management
    Auth(auth::AuthArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) plus rotating JSON file
    let filter = if cli.verbose {
        "qrelay=debug,qrelay_server=debug,qrelay_oauth=debug,qrelay_config=debug,tower_http=debug,info"
    } else {
        "qrelay=info,qrelay_server=info,qrelay_oauth=info,warn"
    };
    let console_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let log_dir = qrelay_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "qrelay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "qrelay=trace,qrelay_server=trace,qrelay_oauth=trace,qrelay_config=trace,info",
                )),
        )
        .init();

    let loaded = qrelay_config::load_config(cli.config.as_deref())?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    for path in loaded.loaded_from() {
        tracing::debug!(path = %path.display(), "Loaded config file");
    }

    let ctx = commands::Context {
        config: loaded.config,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Auth(args) => auth::run(args, &ctx).await,
    }
}
