//! # cubapi-migrate
//!
//! Brings the cubapi database up to date before the services start.
//!
//! ## Usage
//!
//! ```bash
//! # Apply pending migrations
//! DATABASE_URL=postgres://localhost/autocrat cubapi-migrate
//!
//! # JSON logs, longer deadline
//! LOG_FORMAT=json MIGRATIONS_TIMEOUT=10m cubapi-migrate
//! ```
//!
//! Exits non-zero when any migration fails; in that case none of the pending
//! migrations are applied.

use cubapi_migrations::{catalog, DatabasePool, MigrationConfig, MigrationError, Migrator};
use cubapi_telemetry::{init_logging, LoggingConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Application entry point
#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Initialize logging first
    let logging = LoggingConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Invalid logging configuration, using defaults: {e}");
        LoggingConfig::new()
    });
    if let Err(e) = init_logging(&logging.with_service_name("cubapi-migrate")) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting cubapi migrations"
    );

    if let Err(e) = run().await {
        match e.downcast_ref::<MigrationError>() {
            Some(err) => error!(phase = %err.phase(), version = err.version(), error = %err, "Migration failed"),
            None => error!(error = %e, "Migration failed"),
        }
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    let config = MigrationConfig::from_env()?;
    info!(
        database_type = %config.database_type,
        ledger = %config.full_table_name(),
        timeout = ?config.migration_timeout,
        "Loaded migration configuration"
    );

    let pool = Arc::new(DatabasePool::connect(&config).await?);
    let migrator = Migrator::with_pool(Arc::clone(&pool), config);

    let applied = migrator
        .apply_until(catalog::all_migrations(), shutdown_signal())
        .await;
    pool.close().await;

    let applied = applied?;
    match applied.last() {
        Some(last) => info!(
            count = applied.len(),
            latest_version = last.version,
            "Database is up to date"
        ),
        None => info!("No pending migrations"),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
///
/// A handler that cannot be installed never fires rather than cancelling.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        () = ctrl_c => "ctrl+c",
        () = terminate => "sigterm",
    };
    warn!(signal = signal_name, "Shutdown signal received, abandoning migrations");
}
