//! Tracegate gateway
//!
//! Serves the licensing and delivery protocol over HTTP.
//!
//! Usage:
//!   tracegate-gateway --config tracegate.toml --listen 0.0.0.0:8080
//!
//! Secrets may be supplied through `TRACEGATE_SIGNING_SECRET` and
//! `TRACEGATE_HWID_SALT` instead of the config file.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracegate_engine::{Gate, GateConfig};
use tracegate_gateway::{serve, AppState};
use tracegate_store::{GateStore, SqliteStore};
use tracegate_types::SystemClock;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tracegate-gateway")]
#[command(about = "Tracegate licensing and delivery gateway")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Path to the SQLite database
    #[arg(short, long, default_value = "tracegate.db")]
    database: PathBuf,

    /// Server signing secret (overrides the config file)
    #[arg(long, env = "TRACEGATE_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,

    /// HWID hashing salt (overrides the config file)
    #[arg(long, env = "TRACEGATE_HWID_SALT", hide_env_values = true)]
    hwid_salt: Option<String>,

    /// Seconds between expired-state sweeps
    #[arg(long, default_value = "60")]
    sweep_interval: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Tracegate gateway starting...");
    let mut config = match &args.config {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GateConfig::default(),
    };
    if let Some(secret) = args.signing_secret {
        config.signing_secret = secret;
    }
    if let Some(salt) = args.hwid_salt {
        config.hwid_salt = salt;
    }

    let store: Arc<dyn GateStore> = Arc::new(
        SqliteStore::open(&args.database, config.store_budget())
            .with_context(|| format!("Failed to open database {}", args.database.display()))?,
    );
    let gate = Gate::new(config, store, Arc::new(SystemClock)).context("Invalid configuration")?;
    let state = Arc::new(AppState::new(gate));

    let sweeper = state.gate.clone();
    let interval = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let gate = sweeper.clone();
            match tokio::task::spawn_blocking(move || gate.sweep()).await {
                Ok(Ok(report)) => debug!(
                    rows = report.store.total(),
                    request_log = report.request_log,
                    cache = report.cache_entries,
                    "sweep"
                ),
                Ok(Err(e)) => warn!("Sweep failed: {e}"),
                Err(e) => warn!("Sweep task aborted: {e}"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    println!("\n========================================");
    println!("  Tracegate Gateway Running");
    println!("========================================");
    println!("  Listen:    {}", args.listen);
    println!("  Database:  {}", args.database.display());
    println!("  Budget:    {} ms", state.budget.as_millis());
    println!("========================================\n");

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await
    .context("HTTP server failed")
}
