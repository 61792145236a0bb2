//! Main Entrypoint for the Voice Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Initializing logging.
//! 3. Assembling the session controller from the OpenAI Realtime adapters.
//! 4. Running one voice session until Ctrl+C, then tearing it down.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use voice_service::{
    config::Config,
    session::{AudioMode, build_controller, run},
};

#[derive(Debug, Parser)]
#[command(version, about = "Talk to a realtime voice model")]
struct Cli {
    /// Overrides REALTIME_MODEL.
    #[arg(long)]
    model: Option<String>,
    /// Instructions for an opening response once the session is ready.
    #[arg(long)]
    greeting: Option<String>,
    /// Send silence and discard remote audio instead of using sound devices.
    #[arg(long)]
    listen_only: bool,
}

/// Resolves once `Ctrl+C` is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Hanging up...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // --- 3. Assemble the Session ---
    let mode = if cli.listen_only {
        AudioMode::ListenOnly
    } else {
        AudioMode::Native
    };
    let controller = build_controller(&config, mode)?;
    info!(
        model = %config.model,
        session_url = %config.session_url,
        audio = ?mode,
        "Voice client configured. Starting session..."
    );

    // --- 4. Run Until Hang-up ---
    run(&controller, cli.greeting.as_deref(), shutdown_signal()).await
}
