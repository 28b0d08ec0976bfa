mod config;
mod store;
mod store_manager;
mod device;
mod discovery;
mod acquire;
mod binding;
mod sampler;
mod query;
mod api;
#[cfg(test)]
mod testutil;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::{API_PREFIX, OVERRIDE_ENV};
use crate::binding::DeviceBinding;
use crate::config::Config;
use crate::device::DeviceConnector;
use crate::discovery::Discovery;
use crate::store::db::StoreDb;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("twc_monitord=info"))
        )
        .init();

    tracing::info!("Starting twc-monitord");

    // Load config
    let config_path = std::env::args().nth(1);
    let config = Config::load_or_default(config_path.as_deref())
        .context("Failed to load config")?;

    // Open SQLite database
    let db = StoreDb::open(&config.store.db_path)
        .with_context(|| format!("Failed to open database at {}", config.store.db_path.display()))?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let store = StoreHandle::spawn(db);

    let connector = DeviceConnector::new(config.device.port, config.device.request_timeout())
        .context("Failed to build device HTTP client")?;
    let discovery = Arc::new(Discovery::new(connector.clone(), &config.discovery));
    let binding = DeviceBinding::new();

    // Without a device the API still serves, answering "not connected"
    // until a successful /find
    match acquire::acquire(
        &store,
        &connector,
        || std::env::var(OVERRIDE_ENV).ok().filter(|v| !v.is_empty()),
        discovery.as_ref(),
    )
    .await
    {
        Ok(acquired) => {
            tracing::info!(
                "Using wall connector at {} from {}",
                acquired.client.ip(),
                acquired.source
            );
            binding.bind(acquired.client);
        }
        Err(e) => {
            tracing::error!("{}", e);
            tracing::warn!("Serving without a device; call {}/find to retry discovery", API_PREFIX);
        }
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let sampler_handle = tokio::spawn(sampler::run(
        binding.subscribe(),
        store.clone(),
        config.sampler.interval(),
        cancel.clone(),
    ));

    // Build API router
    let app_state = api::routes::AppState {
        store: store.clone(),
        binding: binding.clone(),
        discovery,
        default_lookback: Arc::from(config.api.default_lookback.as_str()),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(sampler_handle, server_handle);

    // Shutdown store thread last so in-flight writes complete
    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
