//! Test helper utilities for integration tests

use cubapi_migrations::sqlx;
use cubapi_migrations::{MigrationConfig, MigrationConfigBuilder, Migrator};
use once_cell::sync::Lazy;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A throwaway SQLite database, deleted on drop.
pub struct TestDb {
    /// Database URL
    pub url: String,
    _dir: TempDir,
}

impl TestDb {
    /// Create an empty database file in a fresh temp dir.
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cub.db").display());
        Self { url, _dir: dir }
    }

    /// Config builder pointing at this database.
    ///
    /// One connection keeps SQLite writes serialized and makes the batch
    /// transaction the only writer while it is open.
    pub fn config(&self) -> MigrationConfigBuilder {
        MigrationConfig::builder()
            .database_url(&self.url)
            .max_connections(1)
            .connect_retries(1)
            .connect_timeout(Duration::from_secs(30))
    }

    /// Migrator with the default settings.
    pub async fn migrator(&self) -> Migrator {
        self.migrator_with(|c| c).await
    }

    /// Migrator with adjusted settings.
    pub async fn migrator_with(
        &self,
        configure: impl FnOnce(MigrationConfigBuilder) -> MigrationConfigBuilder,
    ) -> Migrator {
        let config = configure(self.config())
            .build()
            .expect("Failed to build config");
        Migrator::new(config).await.expect("Failed to connect")
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a table called `name` exists.
pub async fn table_exists(migrator: &Migrator, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
    )
    .bind(name.to_string())
    .fetch_one(migrator.pool().inner())
    .await
    .expect("Failed to query sqlite_master");
    count > 0
}

/// Versions recorded in the ledger, ascending.
pub async fn ledger_versions(migrator: &Migrator) -> Vec<i64> {
    migrator
        .applied()
        .await
        .expect("Failed to read ledger")
        .into_iter()
        .map(|r| r.version)
        .collect()
}

/// Number of rows in `table`.
pub async fn row_count(migrator: &Migrator, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(migrator.pool().inner())
        .await
        .expect("Failed to count rows")
}
