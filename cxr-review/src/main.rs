//! cxr-review - Chest X-ray review service
//!
//! Web UI and JSON API for the Préparateur classification and the Médecin
//! review workflow: validation, treatment follow-up, finalization and
//! export for model retraining.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cxr_common::config::{
    CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use cxr_common::Store;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use cxr_review::{build_router, check, AppState};

/// Command-line arguments for cxr-review
#[derive(Parser, Debug)]
#[command(name = "cxr-review")]
#[command(about = "Chest X-ray review service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CXR_PORT")]
    port: Option<u16>,

    /// Root folder holding data/store.json and exports
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (defaults to the platform config folder)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Verify the installation and data folder
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let defaults = CompiledDefaults::for_current_platform();

    // RUST_LOG wins; otherwise the config file's log_level replaces the default once loaded
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) = reload::Layer::new(
        env_filter.unwrap_or_else(|| EnvFilter::new(&defaults.log_level)),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting cxr-review v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let toml = match &args.config {
        Some(path) => TomlConfig::load_from(path),
        None => TomlConfig::load_or_default(),
    };
    if let (false, Some(level)) = (from_env, &toml.log_level) {
        filter_handle
            .reload(EnvFilter::new(level))
            .context("Failed to apply log_level from config")?;
    }

    let root_folder = RootFolderResolver::new(args.root_folder.clone(), toml.clone()).resolve();
    let layout = RootFolderInitializer::new(root_folder);
    info!("Root folder: {}", layout.root_folder().display());

    match args.command.unwrap_or(Command::Serve) {
        Command::Check => {
            let results = check::run_checks(&layout);
            for result in &results {
                println!("{}", result.line());
            }
            if results.iter().any(|r| !r.ok) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve => {
            let port = args.port.or(toml.port).unwrap_or(defaults.port);
            let seed = toml.export_seed.unwrap_or(defaults.export_seed);
            serve(layout, port, seed).await
        }
    }
}

async fn serve(layout: RootFolderInitializer, port: u16, export_seed: u64) -> Result<()> {
    layout.ensure_directory_exists()?;

    let store_path = layout.store_path();
    info!("Store path: {}", store_path.display());
    let store = Store::open(&store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;

    let state = AppState::new(store, layout, export_seed);
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("cxr-review listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cxr-review stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
