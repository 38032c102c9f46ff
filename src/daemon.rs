//! Long-running lending daemon.
//!
//! Connects to PostgreSQL, applies migrations, wires the lending engine to
//! the log notifier and keeps the pickup sweeper running until Ctrl-C.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::application::LendingEngine;
use crate::application::event_bus::EventBus;
use crate::application::pickup_sweeper::run_pickup_sweeper;
use crate::config::Config;
use crate::domain::clock::{Clock, SystemClock};
use crate::infrastructure::notifications::LogNotifier;
use crate::infrastructure::persistence::PgLendingRepository;

/// Opens the connection pool described by `config`.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");
    Ok(pool)
}

/// Builds the engine used by the daemon and the CLI.
pub fn build_engine(
    pool: PgPool,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> LendingEngine<PgLendingRepository> {
    let repository = Arc::new(PgLendingRepository::new(Arc::new(pool)));
    let bus = EventBus::builder()
        .subscribe_to_all(Arc::new(LogNotifier::new()))
        .build();
    LendingEngine::new(repository, bus, clock, config.policy())
}

/// Runs the daemon until Ctrl-C.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection fails
/// - A migration fails
/// - The shutdown signal cannot be installed
pub async fn run(config: Config) -> Result<()> {
    let pool = connect(&config).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to migrate")?;
    tracing::info!("Migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = build_engine(pool, &config, clock.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_pickup_sweeper(
        engine.reservations.clone(),
        clock,
        config.expiry_sweep_interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Pickup sweeper terminated abnormally");
    }

    Ok(())
}
