//! Echo Mock Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use echo_mock_server::duration::parse_duration;
use echo_mock_server::{load_inline_rules, load_rule_dir, serve, AppState, HttpUpstream, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "echo-mock-server",
    about = "Configurable HTTP echo/mock server - rule matching, templates, delay and error injection",
    version
)]
struct Args {
    /// Interface to bind (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Header read timeout, e.g. "30s" (overrides the config file)
    #[arg(long, value_parser = parse_duration)]
    read_timeout: Option<Duration>,

    /// Response write timeout, e.g. "30s" (overrides the config file)
    #[arg(long, value_parser = parse_duration)]
    write_timeout: Option<Duration>,

    /// Path to the server configuration file (JSON or YAML)
    #[arg(short, long, default_value = "config/server.json")]
    config: PathBuf,

    /// Directory of rule files, loaded recursively
    #[arg(long, default_value = "config/paths")]
    paths_dir: PathBuf,

    /// Directory holding the admin UI files
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Validate configuration and rules, then exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    info!(path = %args.config.display(), "Loading configuration");
    let mut config = ServerConfig::from_file(&args.config)
        .with_context(|| format!("loading server config {}", args.config.display()))?;

    if let Some(host) = args.host.filter(|h| !h.is_empty()) {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout) = args.read_timeout {
        config.read_timeout = timeout;
    }
    if let Some(timeout) = args.write_timeout {
        config.write_timeout = timeout;
    }

    let upstream = Arc::new(HttpUpstream::new().context("building upstream HTTP client")?);
    let state = AppState::new(config, upstream).with_ui_dir(args.ui_dir);

    let inline = load_inline_rules(&state.config, &state.rules);
    let from_dir = load_rule_dir(&args.paths_dir, &state.rules)?;
    info!(inline, from_dir, total = state.rules.len(), "Rules loaded");

    // Validate and exit if requested
    if args.validate {
        println!(
            "Configuration is valid ({} rules loaded: {} inline, {} from {})",
            state.rules.len(),
            inline,
            from_dir,
            args.paths_dir.display()
        );
        return Ok(());
    }

    let address = state.config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    serve(listener, Arc::new(state), shutdown_signal()).await
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
