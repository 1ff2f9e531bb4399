//! Auth command - upstream credential management.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use qrelay_oauth::VerificationPrompt;

use super::{Context, credential_path, token_manager};

/// Arguments for the auth command.
#[derive(Args, Debug)]
pub struct AuthArgs {
    /// Credential file (overrides config)
    #[arg(long, global = true)]
    pub token_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Authorize this device with the provider
    Login,

    /// Show the stored credential
    Status,

    /// Delete the stored credential
    Logout,
}

/// Run the auth command.
pub async fn run(args: AuthArgs, ctx: &Context) -> Result<()> {
    let path = credential_path(&ctx.config, args.token_path.as_deref());
    match args.command {
        AuthCommand::Login => cmd_login(ctx, path).await,
        AuthCommand::Status => cmd_status(ctx, path).await,
        AuthCommand::Logout => cmd_logout(ctx, path).await,
    }
}

async fn cmd_login(ctx: &Context, path: PathBuf) -> Result<()> {
    let manager = token_manager(&ctx.config, path.clone());

    if let Some(status) = manager.status().await? {
        println!(
            "Already authenticated (expires in {})",
            status.expires_in_display()
        );
        println!("Run 'qrelay auth logout' first to re-authorize.");
        return Ok(());
    }

    manager
        .ensure_authorized()
        .await
        .context("Device authorization failed")?;

    println!();
    println!("Authorization successful!");
    println!("Credential saved to {}", path.display());
    Ok(())
}

async fn cmd_status(ctx: &Context, path: PathBuf) -> Result<()> {
    let manager = token_manager(&ctx.config, path.clone());

    println!("Authentication Status");
    println!("---------------------");

    match manager.status().await? {
        Some(status) => {
            println!("Upstream: authenticated");
            println!("  Resource: {}", status.resource_url);
            println!("  Expires: {}", status.expires_in_display());
            if status.needs_refresh {
                println!("  (will refresh on next use)");
            }
            if ctx.verbose {
                println!("  Token type: {}", status.token_type);
                println!("  Expires at: {}", status.expires_at.to_rfc3339());
                println!("  File: {}", path.display());
            }
        }
        None => {
            println!("Upstream: not authenticated");
            println!("  Run 'qrelay auth login' to authorize.");
        }
    }
    Ok(())
}

async fn cmd_logout(ctx: &Context, path: PathBuf) -> Result<()> {
    let manager = token_manager(&ctx.config, path);
    manager.logout().await?;
    println!("Stored credential removed.");
    Ok(())
}

/// Show the verification URL and try to open it in a browser.
pub fn print_prompt(prompt: &VerificationPrompt) {
    println!("Qwen Device Authorization");
    println!("=========================");
    println!();
    println!("Open this URL in your browser:");
    println!();
    println!("  {}", prompt.url());
    println!();
    if !prompt.user_code.is_empty() {
        println!("User code: {}", prompt.user_code);
    }
    println!(
        "Waiting for approval (expires in {}s)...",
        prompt.expires_in
    );
    println!();

    if open_url(prompt.url()).is_err() {
        println!("(Could not open browser automatically)");
        println!();
    }
}

/// Launch the platform browser opener without waiting for it.
fn open_url(url: &str) -> std::io::Result<()> {
    browser_command(url).spawn().map(drop)
}

fn browser_command(url: &str) -> Command {
    #[cfg(target_os = "macos")]
    let mut cmd = Command::new("open");
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start"]);
        cmd
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut cmd = Command::new("xdg-open");

    cmd.arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}
