//! Sandrun HTTP server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sandrun::{Bubblewrap, Config, Executor, LanguageManager};
use sandrun_server::{AppState, router};
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandrun-server")]
#[command(about = "HTTP API for cached, sandboxed code execution")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: $SANDRUN_CONFIG, then built-in)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one
    #[arg(short, long)]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let address = cli.address.unwrap_or_else(|| config.server.address.clone());

    let sandbox = Arc::new(Bubblewrap::new(config.bwrap_binary()));
    let executor = Executor::from_config(&config, sandbox);
    info!(
        languages = ?executor.registry().languages(),
        max_parallel = config.cache.max_parallel,
        cache_ttl = config.cache.ttl,
        "executor ready"
    );

    let state = AppState::new(executor, LanguageManager::from_config(&config));
    let executor = Arc::clone(&state.executor);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // queued requests get 503 instead of holding the shutdown open
            executor.limiter().close();
        })
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
