//! Ingestion admission gate.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!         │
//!         ▼
//!   ┌───────────┐   ┌────────────────────────────────────────────┐   ┌──────────┐
//!   │   http    │──▶│ security::RequestValidator                 │──▶│   sink   │
//!   │  server   │   │  credential → mode                         │   │ (events) │
//!   └───────────┘   │   Backend:  signature → replay             │   └──────────┘
//!         ▲         │   Frontend: domain    → rate limit         │
//!         │         └──────────────────────┬─────────────────────┘
//!   ┌───────────┐                          ▼
//!   │  config   │                 ┌─────────────────┐    ┌─────────┐
//!   │ + watcher │                 │ store (memory | │◀───│ janitor │
//!   └───────────┘                 │ sqlite)         │    └─────────┘
//!                                 └─────────────────┘
//!   admin API, observability and lifecycle run alongside.
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use ingest_gate::config::{load_config, watcher::ConfigWatcher};
use ingest_gate::http::HttpServer;
use ingest_gate::lifecycle::{wait_for_signal, Shutdown};
use ingest_gate::observability::{logging, metrics};
use ingest_gate::sink::MemorySink;
use ingest_gate::store::{janitor::WindowJanitor, Stores};

#[derive(Parser)]
#[command(name = "ingest-gate", version, about = "Admission gate for analytics ingestion")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "INGEST_GATE_CONFIG", default_value = "ingest-gate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_tracing(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ingest-gate starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        storage = ?config.storage.backend,
        projects = config.projects.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let stores = Stores::open(&config.storage)?;
    stores.seed_projects(&config.projects).await?;

    let shutdown = Shutdown::new();

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    // Dropping the notify handle stops watching.
    let _watch_guard = match watcher.run() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    let sink = Arc::new(MemorySink::new(config.sink.buffer_capacity));
    let server = HttpServer::new(config.clone(), stores.clone(), sink);

    let janitor = WindowJanitor::new(
        stores.rate_windows.clone(),
        server.state().window_source(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
    );
    tokio::spawn(janitor.run(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = server.state().clone();
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = ingest_gate::admin::serve_admin(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let server_shutdown = shutdown.subscribe();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
