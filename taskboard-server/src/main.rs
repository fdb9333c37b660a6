//! Task board sync server.
//!
//! # Usage
//!
//! ```bash
//! # In-memory board on the default address 0.0.0.0:9100
//! cargo run --bin taskboard-server
//!
//! # Persist tasks to a JSON file
//! cargo run --bin taskboard-server -- --store tasks.json --bind 127.0.0.1:9100
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_server::config::{ServerCliArgs, ServerConfig};
use taskboard_server::server::{self, ServerState};
use taskboard_server::store::{JsonFileStore, MemoryStore, RecordStore};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting task board server");

    let result = match &config.store_path {
        Some(path) => match JsonFileStore::open(path).await {
            Ok(store) => serve(&config, store).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to open task store");
                std::process::exit(1);
            }
        },
        None => serve(&config, MemoryStore::new()).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "failed to start task board server");
        std::process::exit(1);
    }
}

/// Runs the server over `store` until it fails or Ctrl-C is received.
async fn serve<S: RecordStore + 'static>(
    config: &ServerConfig,
    store: S,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(ServerState::with_max_frame_size(store, config.max_frame_size));
    let (bound_addr, mut handle) =
        server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await?;
    tracing::info!(addr = %bound_addr, "task board server listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            state.hub().close_all().await;
            handle.abort();
        }
    }
    Ok(())
}
