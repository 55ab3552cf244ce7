use std::sync::Arc;
use tracing::{error, info};

use tidings::{api, bus::EventBus, config::Config, Dispatcher, EventSink, StoreHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(?config, "Tidings starting...");

    let bus = Arc::new(EventBus::new(config.bus_capacity));

    // Connected on the first invocation, then shared by all of them.
    // Only trigger paths go on the bus; notification writes stay off it.
    let store = Arc::new(StoreHandle::lazy(
        config.store.clone(),
        config.max_batch_writes,
        Some(EventSink::new(bus.clone(), Dispatcher::watched())),
    ));

    let dispatcher = Dispatcher::new(store, config.locale);

    // Local writes arrive over the bus
    let listener_handle = tokio::spawn(dispatcher.clone().run(bus.subscribe()));

    // Platform deliveries arrive over HTTP
    let app = api::router(dispatcher);
    info!("Trigger ingress listening on {}", config.http_addr);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = listener_handle => {
            error!("Dispatcher stopped unexpectedly");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
