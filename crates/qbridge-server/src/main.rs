//! QBridge Server - Main entry point

use anyhow::{bail, Context, Result};
use qbridge_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::{error, info};

use qbridge_server::{config::Config, service::BridgeService};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("qbridge-server")
        .filter_directives("qbridge_server=debug,lapin=info,sqlx=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting QBridge server");

    let config = Config::load()?;
    info!(
        queue = %config.bridge.queue_name,
        pool_size = config.bridge.pool_size,
        driver = %config.database.driver,
        "Configuration loaded"
    );

    let mut service = BridgeService::new(config);
    service.start().await.context("bridge failed to start")?;

    let workers_exited = tokio::select! {
        _ = shutdown_signal() => false,
        _ = service.wait_workers_stopped() => true,
    };

    if workers_exited {
        error!("All workers stopped without a shutdown request");
    }

    let stats = service.stop().await?;
    info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        rejected = stats.rejected,
        requeued = stats.requeued,
        settle_failures = stats.settle_failures,
        "Server shut down gracefully"
    );

    if workers_exited {
        bail!("consumers stopped unexpectedly, the broker connection was probably lost");
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
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
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
