//! Classline - outbound message delivery scheduler entry point

use anyhow::Result;
use classline_api::AppState;
use classline_common::config::{Config, LoggingConfig};
use classline_core::{
    BroadcastOrchestrator, DeliveryQueue, Dispatcher, DispatcherConfig, GatewayAdapter,
    GatewayDirectory, Throttle,
};
use classline_storage::DatabasePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Classline delivery scheduler...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    // Chat gateway: delivery channel and recipient directory
    let gateway = GatewayAdapter::new(&config.channel)?;
    let directory = Arc::new(GatewayDirectory::new(gateway.clone()));

    // Core services
    let throttle = Arc::new(Throttle::new(&db_pool));
    let queue = Arc::new(DeliveryQueue::new(&db_pool, throttle.clone()));
    let orchestrator = Arc::new(BroadcastOrchestrator::new(
        &db_pool,
        throttle.clone(),
        directory,
    ));

    // Dispatcher with cancellable shutdown
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        queue.clone(),
        throttle.clone(),
        orchestrator.clone(),
        Arc::new(gateway),
        DispatcherConfig::from(&config.scheduler),
        shutdown.clone(),
    );

    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run().await;
    });

    // API server
    let api_handle = {
        let state = AppState {
            db_pool: db_pool.clone(),
            queue,
            orchestrator,
            throttle,
        };
        let bind = config.api.bind.clone();

        tokio::spawn(async move {
            let app = classline_api::create_router(state);
            let listener = match tokio::net::TcpListener::bind(&bind).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("Failed to bind API server on {}: {}", bind, e);
                    return;
                }
            };
            info!("API server listening on {}", bind);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("Classline started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown: the dispatcher drains its current send and leaves
    // remaining entries for the next process start.
    shutdown.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), dispatcher_handle).await;

    api_handle.abort();

    info!("Classline shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},classline=debug", config.level)));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_level(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init();
    }
}
