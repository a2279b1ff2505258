//! Main Entrypoint for the Voice Assistant Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the tool registry and conversation orchestrator.
//! 4. Opening the realtime session (audio degradation is logged, not fatal).
//! 5. Running until Ctrl+C or remote close, then tearing the session down.

use anyhow::Context;
use aria_assistant::{config::Config, orchestrator::Orchestrator, tools};
use aria_realtime::{Session, SessionOptions, transport::endpoint_url};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Parser)]
#[command(name = "assistant", about = "Voice assistant over the OpenAI Realtime API")]
struct Args {
    /// Realtime model to use, overriding REALTIME_MODEL.
    #[arg(long)]
    model: Option<String>,

    /// Assistant voice, overriding REALTIME_VOICE.
    #[arg(long)]
    voice: Option<String>,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the session.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing session...");

    // --- 3. Build Tools and Orchestrator ---
    let registry = tools::builtin_registry();
    let orchestrator = Arc::new(Orchestrator::new(registry.clone()));

    // --- 4. Open the Realtime Session ---
    let model = args.model.unwrap_or(config.model);
    let voice = args.voice.unwrap_or(config.voice);

    let mut options = SessionOptions::new(config.openai_api_key.clone());
    options.url = endpoint_url(&model);
    options.config.voice = voice.clone();
    if !registry.is_empty() {
        options.config.tools = registry.definitions();
    }
    options.response_timeout = Duration::from_secs(config.response_timeout_secs);
    if let Some(instructions) = config.instructions {
        options.config.instructions = instructions;
    }

    let mut session = Session::initialize(options, orchestrator.clone())
        .await
        .context("Failed to open realtime session")?;
    info!(%model, %voice, "Session open. Speak when ready.");

    // --- 5. Run Until Shutdown ---
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = session.wait() => info!("Session ended by the remote endpoint."),
    }
    session.shutdown().await;

    let turns = orchestrator.history().len();
    info!(turns, "Assistant has shut down.");
    Ok(())
}
