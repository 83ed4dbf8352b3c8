//! Storefront BFF
//!
//! Backend-for-frontend between storefront clients and a commerce REST API.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                   STOREFRONT BFF                      │
//!                      │                                                       │
//!   Client Request     │  ┌─────────┐   ┌────────────┐   ┌─────────────────┐   │
//!   ───────────────────┼─▶│  http   │──▶│ rate limit │──▶│    handlers     │   │
//!                      │  │ server  │   │ local/dist │   └────────┬────────┘   │
//!                      │  └─────────┘   └────────────┘            │            │
//!                      │                                          ▼            │
//!                      │                ┌───────────┐    ┌─────────────────┐   │
//!                      │                │   cache   │◀──▶│   storefront    │   │
//!                      │                │ mem + kv  │    │    service      │   │
//!                      │                └───────────┘    └────────┬────────┘   │
//!                      │                                          ▼            │
//!   Client Response    │                ┌───────────┐    ┌─────────────────┐   │
//!   ◀──────────────────┼────────────────│  dedup +  │───▶│ circuit breaker │───┼──▶ Commerce
//!                      │                │  retries  │    │  + timeouts     │   │     API
//!                      │                └───────────┘    └─────────────────┘   │
//!                      │                                                       │
//!                      │  admin API · health · cache warmer · config reload    │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use storefront_bff::cache::{RedisStore, StoreHandles};
use storefront_bff::clock;
use storefront_bff::config::{load_config, watcher::ConfigWatcher, BffConfig};
use storefront_bff::lifecycle::{wait_for_signal, Shutdown};
use storefront_bff::observability::{logging, metrics};
use storefront_bff::HttpServer;

#[derive(Parser)]
#[command(name = "storefront-bff")]
#[command(about = "Caching, rate-limited backend-for-frontend for a commerce API", long_about = None)]
struct Cli {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "BFF_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BffConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "storefront-bff starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        rate_limit_enabled = config.rate_limit.enabled,
        warmer_enabled = config.warmer.enabled,
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

    // An unreachable store is not fatal; every component runs memory-only.
    let stores = match &config.store.redis_url {
        Some(url) => match RedisStore::connect(url, config.store.op_timeout()).await {
            Ok(store) => Some(StoreHandles::new(Arc::new(store))),
            Err(e) => {
                tracing::warn!(error = %e, "Durable store unavailable, continuing memory-only");
                None
            }
        },
        None => None,
    };

    // The watcher must stay alive for the lifetime of the server.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::with_stores(config, stores, clock::system())?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
