//! Stateful reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                     STATEFUL PROXY                        │
//!                    │                                                          │
//!  Client Request    │  ┌─────────┐   ┌─────────┐   ┌──────────┐   ┌─────────┐  │
//!  ──────────────────┼─▶│   net   │──▶│  http   │──▶│ routing  │──▶│  state  │  │
//!                    │  │listener │   │ request │   │ selector │   │pipeline │  │
//!                    │  └─────────┘   └─────────┘   └──────────┘   └────┬────┘  │
//!                    │                                                  │       │
//!                    │                                                  ▼       │
//!  Client Response   │  ┌─────────┐              ┌──────────────────────────┐   │
//!  ◀─────────────────┼──│ headers │◀─────────────│   proxy (stream relay)   │◀──┼── Backend
//!                    │  │retrieve │              │  Host rewrite, send rules │   │
//!                    │  └─────────┘              └──────────────────────────┘   │
//!                    │                                                          │
//!                    │  config (load, merge, watch) · expression · admin ·      │
//!                    │  observability · lifecycle                               │
//!                    └──────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use stateful_proxy::admin::serve_admin;
use stateful_proxy::config::{load_config, watcher, ConfigWatcher};
use stateful_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use stateful_proxy::net::Listener;
use stateful_proxy::observability::{init_metrics, init_tracing};
use stateful_proxy::routing::{self, Forwarder};
use stateful_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "stateful-proxy", version)]
#[command(about = "Reverse proxy with expression based routing and state API checks", long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,

    /// Validate the configuration, print the resolved forwarders and exit.
    #[arg(long)]
    check: bool,

    /// Log level, overriding the configuration file. `RUST_LOG` wins over both.
    #[arg(long)]
    log_level: Option<String>,
}

fn describe(forwarder: &Forwarder) -> String {
    format!(
        "{} -> {} (state APIs: {}, send rules: {}, retrieve rules: {})",
        forwarder.name,
        forwarder.url(),
        forwarder.state_apis.len(),
        forwarder.headers.send.len(),
        forwarder.headers.retrieve.len(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let table = routing::resolve(&config.forwarders)?;

    if cli.check {
        println!("{}: ok", cli.config.display());
        for forwarder in table.iter() {
            println!("  {}", describe(forwarder));
        }
        return Ok(());
    }

    init_tracing(&config.observability, cli.log_level.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stateful-proxy starting");
    tracing::info!(
        path = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        forwarders = table.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let table = routing::shared(table);
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // Dropping the watcher stops it, keep it alive until exit.
    let (config_watcher, updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match config_watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    tokio::spawn(watcher::apply_updates(updates, table.clone()));

    let listener = Listener::bind(&config.listener).await?;
    let server = ProxyServer::new(&config, table)?;

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let state = server.state();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(addr, state, shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
