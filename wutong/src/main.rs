//! WuTong Mountain player.
//!
//! A line-oriented interface to a journey, suitable for play in a terminal
//! and for automated testing:
//!
//! ```bash
//! cargo run -p wutong -- --server http://localhost:3000
//! cargo run -p wutong -- --local          # no server, talks to Claude directly
//! ```

mod headless;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wutong_core::provider::DEFAULT_MODEL;
use wutong_core::{
    ClaudeProvider, FileSlots, PersistenceManager, RemoteSession, SessionApi, SessionController,
    SessionStore,
};

/// Play WuTong Mountain from the terminal.
#[derive(Parser, Debug)]
#[command(name = "wutong")]
#[command(about = "WuTong Mountain - a journey in dreams and waking")]
#[command(version)]
struct Args {
    /// Session server to play against
    #[arg(long, env = "WUTONG_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Directory for the autosave and named saves
    #[arg(long, env = "WUTONG_SAVES_DIR", default_value = "saves")]
    saves_dir: PathBuf,

    /// Run the session engine in-process instead of using a server
    #[arg(long)]
    local: bool,

    /// Claude model, with --local
    #[arg(long, env = "WUTONG_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays a clean transcript.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let api: Arc<dyn SessionApi> = if args.local {
        let provider = ClaudeProvider::from_env(args.model.clone())
            .context("ANTHROPIC_API_KEY must be set to play with --local")?;
        Arc::new(SessionController::new(
            Arc::new(SessionStore::new()),
            Arc::new(provider),
        ))
    } else {
        Arc::new(RemoteSession::new(args.server.clone())?)
    };

    let saves = PersistenceManager::new(Arc::new(FileSlots::new(&args.saves_dir)));

    tracing::info!(
        server = %args.server,
        local = args.local,
        saves_dir = %args.saves_dir.display(),
        "Starting player"
    );
    headless::run_headless(api, saves).await
}
