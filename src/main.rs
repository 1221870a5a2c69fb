//! Round-robin reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                  BALANCER PROXY                  │
//!   Client Request      │  ┌──────────┐   ┌───────────┐   ┌─────────────┐  │
//!   ────────────────────┼─▶│  axum    │──▶│   rate    │──▶│ round-robin │  │
//!                       │  │  router  │   │  limiter  │   │  registry   │  │
//!                       │  └──────────┘   └───────────┘   └──────┬──────┘  │
//!                       │       ▲ 429 / 503 / 502                │         │
//!   Client Response     │  ┌────┴─────┐                   ┌──────▼──────┐  │
//!   ◀───────────────────┼──│ response │◀──────────────────│ hyper client│◀─┼── Backend
//!                       │  └──────────┘   mark_down on    └─────────────┘  │
//!                       │                 transport error        ▲         │
//!                       │  ┌───────────────┐                     │         │
//!                       │  │ health monitor│── GET /healthz ─────┘         │
//!                       │  └───────────────┘   mark_up / mark_down         │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use balancer_proxy::config::{config_warnings, load_config, ConfigWatcher};
use balancer_proxy::lifecycle::{signals, Shutdown};
use balancer_proxy::observability::{logging, metrics};
use balancer_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "balancer-proxy")]
#[command(about = "Round-robin reverse proxy with per-client rate limiting", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Disable reloading rate limits when the config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        clients = config.clients.len(),
        health_check_interval_secs = config.health_check.interval_secs,
        "Configuration loaded"
    );

    for warning in config_warnings(&config) {
        tracing::warn!("{}", warning);
    }

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    // Keep the watcher alive for the lifetime of the process.
    let (_watcher, config_updates) = if cli.no_watch {
        let (_, rx) = mpsc::unbounded_channel();
        (None, rx)
    } else {
        let (watcher, rx) = ConfigWatcher::new(&cli.config);
        match watcher.run() {
            Ok(handle) => (Some(handle), rx),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                (None, rx)
            }
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
