// Main entry point for the scheduler server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_core::kernel::clock::SystemClock;
use scheduler_core::kernel::{Dispatcher, Worker};
use scheduler_core::kernel::worker::WorkerConfig;
use scheduler_core::server::build_app;
use scheduler_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scheduler_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting puzzlebot scheduler");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let dispatcher = Arc::new(Dispatcher::new(
        config.puzzlebot_base_url.clone(),
        Duration::from_secs(config.http_timeout_seconds),
        config.http_retries,
    )?);

    let worker_config = WorkerConfig {
        poll_interval: Duration::from_secs(config.worker_poll_seconds),
        batch_size: config.worker_batch_size,
        lock_lease_seconds: config.worker_lock_lease_seconds,
        max_concurrent_runs: config.max_concurrent_runs,
    };
    let worker = Arc::new(Worker::new(
        pool.clone(),
        dispatcher,
        Arc::new(SystemClock),
        worker_config,
    ));

    let shutdown = CancellationToken::new();
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let app = build_app(pool);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "binding HTTP listener");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = worker_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
