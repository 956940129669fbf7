//! WuTong Mountain session server.
//!
//! Usage: `wutong-server [--port 3000] [--model <model>]`
//!
//! Requires ANTHROPIC_API_KEY, read from the environment or a `.env` file.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use wutong_core::{ClaudeProvider, SessionController, SessionStore};
use wutong_server::{create_router, telemetry, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let config = ServerConfig::parse();
    telemetry::init(config.json_logs);

    let provider = ClaudeProvider::from_env(config.model.clone())
        .context("Failed to configure the narrative provider")?
        .with_max_tokens(config.max_tokens);

    let controller = SessionController::new(Arc::new(SessionStore::new()), Arc::new(provider))
        .with_config(config.controller_config());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        model = %config.model,
        provider_timeout_secs = config.provider_timeout_secs,
        "WuTong Mountain server listening"
    );

    axum::serve(listener, create_router(AppState::new(controller)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
