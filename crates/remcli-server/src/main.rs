//! Remote CLI server
//!
//! Serves the tunnel endpoint and runs the built-in commands for each
//! connection.

use anyhow::{Context, Result};
use clap::Parser;
use remcli_auth::{HttpAuthConfig, HttpAuthenticator};
use remcli_server::{BuiltinCommands, CliConnectionHandler, RunnerConfig};
use remcli_tunnel::{TunnelServer, TunnelServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run commands on behalf of remote `remcli` clients
#[derive(Parser, Debug)]
#[command(name = "remcli-server")]
#[command(about = "Serve remote CLI invocations over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Address the HTTP endpoint binds to
    #[arg(long, env = "REMCLI_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Seconds a half-open session waits for its second leg
    #[arg(long, env = "REMCLI_SESSION_TIMEOUT", default_value = "15")]
    session_timeout: u64,

    /// Accepted Basic credentials as user:password (repeatable, comma separated in env)
    #[arg(long = "basic-auth", env = "REMCLI_BASIC_AUTH", value_delimiter = ',')]
    basic_auth: Vec<String>,

    /// Accepted bearer tokens, optionally as name:token (repeatable, comma separated in env)
    #[arg(long = "bearer-token", env = "REMCLI_BEARER_TOKENS", value_delimiter = ',')]
    bearer_tokens: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn auth_configs(&self) -> Vec<HttpAuthConfig> {
        let mut configs = Vec::new();
        if !self.basic_auth.is_empty() {
            configs.push(HttpAuthConfig::Basic {
                credentials: self.basic_auth.clone(),
            });
        }
        if !self.bearer_tokens.is_empty() {
            configs.push(HttpAuthConfig::BearerToken {
                tokens: self.bearer_tokens.clone(),
            });
        }
        configs
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.session_timeout == 0 {
        anyhow::bail!("--session-timeout must be at least 1 second");
    }

    let authenticator = HttpAuthenticator::from_configs(&cli.auth_configs());
    if !authenticator.requires_auth() {
        warn!("No authentication configured; every client runs as anonymous");
    }

    let session_timeout = Duration::from_secs(cli.session_timeout);
    let handler = CliConnectionHandler::new(
        Arc::new(BuiltinCommands::new()),
        RunnerConfig {
            start_timeout: session_timeout,
            ..Default::default()
        },
    );
    let server = TunnelServer::new(
        TunnelServerConfig {
            session_timeout,
            ..Default::default()
        },
        authenticator,
        Arc::new(handler),
    );

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;

    tokio::select! {
        result = server.serve(listener) => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
