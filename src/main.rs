//! Poly bridge indexer - multi-chain listener and status reconciler
//!
//! Watches the bridge contracts of every configured chain, stores each leg of
//! a cross-chain transfer and keeps the status of every transfer up to date.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod chain;
mod config;
mod error;
mod events;
mod metrics;
mod models;
mod reconcile;
mod state;

use chain::{AdapterRegistry, ChainManager};
use config::Settings;
use metrics::MetricsServer;
use reconcile::StatusReconciler;
use state::{CrossChainStore, StateManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting polybridge indexer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize database connection
    let state_manager = Arc::new(StateManager::new(&settings.database).await?);
    state_manager.run_migrations().await?;
    state_manager.health_check().await?;
    info!("Database connection established");
    let store: Arc<dyn CrossChainStore> = state_manager;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Build one listener per enabled chain, unknown chain ids abort startup
    let registry = AdapterRegistry::with_defaults();
    let chain_manager =
        ChainManager::new(&settings, &registry, store.clone(), shutdown_rx.clone()).await?;
    info!("{} chain listeners initialized", chain_manager.chain_count());

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port, chain_manager.statuses());
        let shutdown = shutdown_rx.clone();
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start status reconciler
    let reconciler_handle = if settings.reconciler.enabled {
        let reconciler =
            StatusReconciler::new(store.clone(), settings.reconciler.clone(), shutdown_rx.clone());
        Some(tokio::spawn(reconciler.run()))
    } else {
        warn!("Status reconciler disabled");
        None
    };

    // Start chain listeners
    let mut supervisor = chain_manager.spawn();
    info!("Polybridge indexer is running");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping...");
                break;
            }
            exit = supervisor.next_exit() => match exit {
                Some(exit) if exit.result.is_err() => {
                    warn!("{} listeners still running", supervisor.running());
                }
                Some(exit) => info!("Listener for chain {} finished", exit.chain_id),
                None => {
                    error!("All chain listeners have stopped");
                    break;
                }
            },
        }
    }

    // Graceful shutdown: in-flight blocks finish before the listeners exit
    let _ = shutdown_tx.send(true);
    supervisor.join().await;
    if let Some(handle) = reconciler_handle {
        if let Err(e) = handle.await {
            error!("Reconciler task failed: {}", e);
        }
    }
    if let Some(handle) = metrics_handle {
        if let Err(e) = handle.await {
            error!("Metrics task failed: {}", e);
        }
    }

    info!("Polybridge indexer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,polybridge_indexer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
