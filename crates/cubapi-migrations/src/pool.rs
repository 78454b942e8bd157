//! Database connection pool management.

use crate::config::{DatabaseType, MigrationConfig};
use crate::error::{MigrationError, Result};
use serde::Serialize;
use sqlx::{any::AnyPoolOptions, AnyPool};
use tracing::{info, warn};

/// Database connection pool.
pub struct DatabasePool {
    pool: AnyPool,
    database_type: DatabaseType,
    max_connections: u32,
}

impl DatabasePool {
    /// Connect, retrying with a linear back-off.
    ///
    /// Attempt `n` that fails waits `n * connect_backoff` before the next one.
    /// Gives up after `connect_retries` attempts.
    pub async fn connect(config: &MigrationConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let mut last_error = None;
        for attempt in 1..=config.connect_retries {
            info!(
                attempt,
                database_type = %config.database_type,
                "Attempting to connect to database"
            );

            match Self::try_connect(config).await {
                Ok(pool) => {
                    return Ok(Self {
                        pool,
                        database_type: config.database_type,
                        max_connections: config.max_connections,
                    })
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to connect to database");
                    last_error = Some(e);
                }
            }

            if attempt < config.connect_retries {
                tokio::time::sleep(config.connect_backoff * attempt).await;
            }
        }

        match last_error {
            Some(source) => Err(MigrationError::Connection {
                attempts: config.connect_retries,
                source,
            }),
            None => Err(MigrationError::config("connect_retries must be at least 1")),
        }
    }

    async fn try_connect(config: &MigrationConfig) -> std::result::Result<AnyPool, sqlx::Error> {
        AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await
    }

    /// Wrap a pool the caller already owns.
    #[must_use]
    pub fn from_pool(pool: AnyPool, database_type: DatabaseType) -> Self {
        let max_connections = pool.options().get_max_connections();
        Self {
            pool,
            database_type,
            max_connections,
        }
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Get the database type.
    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.max_connections,
        }
    }

    /// Health probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|source| MigrationError::Connection {
                attempts: 1,
                source,
            })?;

        Ok(())
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("database_type", &self.database_type)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Current number of connections.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum connections allowed.
    pub max_connections: u32,
}

impl PoolStats {
    /// Get the number of active connections.
    #[must_use]
    pub fn active(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }
}
