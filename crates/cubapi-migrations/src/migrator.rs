//! Migration runner.

use crate::config::{DatabaseType, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::ledger::LedgerStore;
use crate::migration::{AppliedMigration, Catalog, Migration, MigrationStatus};
use crate::pool::DatabasePool;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{AnyConnection, Executor};
use std::collections::{HashMap, HashSet};
use std::future::{pending, Future};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long a cancelled batch waits for a connection to cancel its statement.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Applies a catalog of forward-only migrations as one transaction.
///
/// A migrator is bound to one database. `apply` bootstraps the ledger, works
/// out which catalog entries are pending, runs them in ascending version order
/// together with their ledger inserts inside a single transaction, and
/// commits only if every step succeeded. The engine does not lock against
/// other processes: callers must make sure only one `apply` runs against a
/// database at a time.
pub struct Migrator {
    pool: Arc<DatabasePool>,
    config: Arc<MigrationConfig>,
    ledger: LedgerStore,
}

impl Migrator {
    /// Connect using `config` and create a migrator.
    pub async fn new(config: MigrationConfig) -> Result<Self> {
        let pool = DatabasePool::connect(&config).await?;
        Ok(Self::with_pool(Arc::new(pool), config))
    }

    /// Create a migrator with an existing pool.
    #[must_use]
    pub fn with_pool(pool: Arc<DatabasePool>, config: MigrationConfig) -> Self {
        let ledger = LedgerStore::new(&config);
        Self {
            pool,
            config: Arc::new(config),
            ledger,
        }
    }

    /// The ledger store this migrator writes to.
    #[must_use]
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the database pool.
    #[must_use]
    pub fn pool(&self) -> Arc<DatabasePool> {
        Arc::clone(&self.pool)
    }

    /// Make sure the ledger table exists. Safe to call any number of times.
    pub async fn init(&self) -> Result<()> {
        self.ledger.ensure_initialized(self.pool.inner()).await
    }

    /// The most recently applied migration, if any.
    pub async fn latest_applied(&self) -> Result<Option<AppliedMigration>> {
        self.ledger.latest_applied(self.pool.inner()).await
    }

    /// All ledger rows, ordered by version.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        self.ledger.applied(self.pool.inner()).await
    }

    /// The migrations `apply` would run right now, without running them.
    pub async fn plan(&self, migrations: impl IntoIterator<Item = Migration>) -> Result<Vec<Migration>> {
        let catalog = Catalog::new(migrations)?;
        let plan = self.prepare(&catalog).await?;
        Ok(plan.pending.into_iter().cloned().collect())
    }

    /// Apply every pending migration in `migrations`, bounded by the configured timeout.
    ///
    /// Returns the ledger rows written, in the order they were applied. On any
    /// error nothing from this call is left behind except the ledger table
    /// itself.
    pub async fn apply(
        &self,
        migrations: impl IntoIterator<Item = Migration>,
    ) -> Result<Vec<AppliedMigration>> {
        self.apply_until(migrations, pending::<()>()).await
    }

    /// Like [`apply`](Self::apply), aborting and rolling back when `cancel` completes.
    ///
    /// Cancellation and the deadline return without waiting for the running
    /// script. On PostgreSQL the script is cancelled server side; on SQLite it
    /// runs to completion in the background. Either way the transaction is
    /// rolled back before its connection is reused.
    pub async fn apply_until<F>(
        &self,
        migrations: impl IntoIterator<Item = Migration>,
        cancel: F,
    ) -> Result<Vec<AppliedMigration>>
    where
        F: Future<Output = ()>,
    {
        let catalog = Catalog::new(migrations)?;
        let timeout = self.config.migration_timeout;

        let mut deadline = pin!(tokio::time::sleep(timeout));
        let mut cancel = pin!(cancel);

        let plan = tokio::select! {
            plan = self.prepare(&catalog) => plan?,
            () = &mut cancel => return Err(MigrationError::Cancelled),
            () = &mut deadline => return Err(MigrationError::Timeout(timeout)),
        };

        info!(count = plan.pending.len(), "Applying migrations");
        if plan.pending.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(MigrationError::Begin)?;

        let backend_pid = match self.pool.database_type() {
            DatabaseType::PostgreSQL => Some(
                sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(MigrationError::Begin)?,
            ),
            DatabaseType::SQLite => None,
        };

        let mut clock = AppliedClock::new(plan.last_applied_at);
        let outcome = tokio::select! {
            applied = self.apply_batch(&mut *tx, &plan.pending, &mut clock) => applied,
            () = &mut cancel => Err(MigrationError::Cancelled),
            () = &mut deadline => Err(MigrationError::Timeout(timeout)),
        };

        match outcome {
            Ok(applied) => {
                tx.commit().await.map_err(|e| {
                    error!(error = %e, "Failed to commit migrations; ledger state must be checked by hand");
                    MigrationError::Commit(e)
                })?;
                info!(
                    count = applied.len(),
                    latest_version = applied.last().map(|r| r.version),
                    execution_time_ms = start.elapsed().as_millis() as u64,
                    "Migrations applied"
                );
                Ok(applied)
            }
            Err(e @ (MigrationError::Cancelled | MigrationError::Timeout(_))) => {
                warn!(error = %e, "Abandoning migration batch");
                if let Some(pid) = backend_pid {
                    self.cancel_backend(pid).await;
                }
                // Dropping the transaction queues its rollback behind the
                // abandoned statement.
                drop(tx);
                Err(e)
            }
            Err(e) => {
                error!(version = e.version(), error = %e, "Migration batch failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back migration transaction");
                }
                Err(e)
            }
        }
    }

    /// Ask PostgreSQL to cancel whatever the batch connection is running.
    async fn cancel_backend(&self, pid: i32) {
        let cancel = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(pid)
            .fetch_one(self.pool.inner());

        match tokio::time::timeout(CANCEL_GRACE, cancel).await {
            Ok(Ok(signalled)) => debug!(pid, signalled, "Cancelled migration statement"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed to cancel migration statement"),
            Err(_) => warn!(pid, "No connection free to cancel migration statement"),
        }
    }

    /// Bootstrap the ledger and select the pending subset of `catalog`.
    async fn prepare<'a>(&self, catalog: &'a Catalog) -> Result<Plan<'a>> {
        self.init().await?;

        let latest = self.latest_applied().await?;
        debug!(
            latest_version = latest.as_ref().map(|r| r.version),
            "Retrieved most recently applied migration"
        );
        let latest_version = latest.as_ref().map(|r| r.version);
        let last_applied_at = self.ledger.last_applied_at(self.pool.inner()).await?;

        if !self.config.verify_checksums && !self.config.allow_out_of_order {
            return Ok(Plan {
                pending: catalog.after(latest_version),
                last_applied_at,
            });
        }

        let applied = self.applied().await?;
        if self.config.verify_checksums {
            verify_checksums(catalog, &applied)?;
        }

        let pending = if self.config.allow_out_of_order {
            let recorded: HashSet<i64> = applied.iter().map(|r| r.version).collect();
            let pending: Vec<&Migration> = catalog
                .migrations()
                .iter()
                .filter(|m| !recorded.contains(&m.version))
                .collect();
            if let Some(latest) = latest_version {
                for m in pending.iter().filter(|m| m.version < latest) {
                    warn!(version = m.version, latest_version = latest, "Applying migration out of order");
                }
            }
            pending
        } else {
            catalog.after(latest_version)
        };

        Ok(Plan {
            pending,
            last_applied_at,
        })
    }

    async fn apply_batch(
        &self,
        conn: &mut AnyConnection,
        pending: &[&Migration],
        clock: &mut AppliedClock,
    ) -> Result<Vec<AppliedMigration>> {
        let mut applied = Vec::with_capacity(pending.len());

        for migration in pending {
            info!(
                version = migration.version,
                created = %migration.authored_at,
                description = %migration.description,
                "Applying migration"
            );

            (&mut *conn)
                .execute(migration.script.as_str())
                .await
                .map_err(|source| MigrationError::Execution {
                    version: migration.version,
                    source,
                })?;

            let record = AppliedMigration::new(migration, clock.tick());
            self.ledger.record_applied(&mut *conn, &record).await?;
            applied.push(record);
        }

        Ok(applied)
    }

    /// Report every catalog entry against the ledger.
    pub async fn status(&self, migrations: impl IntoIterator<Item = Migration>) -> Result<StatusReport> {
        let catalog = Catalog::new(migrations)?;
        self.init().await?;

        let applied = self.applied().await?;
        let latest_version = applied.last().map(|r| r.version);
        let mut by_version: HashMap<i64, AppliedMigration> =
            applied.into_iter().map(|r| (r.version, r)).collect();

        let mut entries = Vec::with_capacity(catalog.len());
        for migration in catalog.migrations() {
            let entry = match by_version.remove(&migration.version) {
                Some(record) => {
                    let checksum_drift = !record.matches(migration);
                    if checksum_drift {
                        warn!(version = migration.version, "Checksum mismatch detected");
                    }
                    StatusEntry {
                        migration: migration.clone(),
                        status: MigrationStatus::Applied,
                        record: Some(record),
                        checksum_drift,
                    }
                }
                None => {
                    let status = match latest_version {
                        Some(latest)
                            if migration.version < latest && !self.config.allow_out_of_order =>
                        {
                            MigrationStatus::Skipped
                        }
                        _ => MigrationStatus::Pending,
                    };
                    StatusEntry {
                        migration: migration.clone(),
                        status,
                        record: None,
                        checksum_drift: false,
                    }
                }
            };
            entries.push(entry);
        }

        let mut unknown: Vec<AppliedMigration> = by_version.into_values().collect();
        unknown.sort_by_key(|r| r.version);

        Ok(StatusReport {
            entries,
            unknown,
            latest_version,
        })
    }

    /// Run a raw schema script in its own transaction, outside the ledger.
    pub async fn apply_schema(&self, sql: &str) -> Result<()> {
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(MigrationError::Begin)?;

        (&mut *tx)
            .execute(sql)
            .await
            .map_err(MigrationError::Schema)?;
        tx.commit().await.map_err(MigrationError::Commit)?;

        debug!("Schema applied");
        Ok(())
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("pool", &self.pool)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

struct Plan<'a> {
    pending: Vec<&'a Migration>,
    last_applied_at: Option<DateTime<Utc>>,
}

fn verify_checksums(catalog: &Catalog, applied: &[AppliedMigration]) -> Result<()> {
    for record in applied {
        if let Some(migration) = catalog.get(record.version) {
            let current = migration.checksum();
            if current != record.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: record.version,
                    recorded: record.checksum.clone(),
                    current,
                });
            }
        }
    }
    Ok(())
}

/// Stamps `date_applied` so it strictly increases, even when the wall clock
/// stalls or steps backwards. Stamps are truncated to the ledger's
/// microsecond precision.
#[derive(Debug)]
struct AppliedClock {
    last: Option<DateTime<Utc>>,
}

impl AppliedClock {
    fn new(last: Option<DateTime<Utc>>) -> Self {
        Self { last }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let next = match self.last {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

/// One catalog entry's standing against the ledger.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    /// The catalog entry.
    pub migration: Migration,
    /// Whether it has been applied.
    pub status: MigrationStatus,
    /// Its ledger row, when applied.
    pub record: Option<AppliedMigration>,
    /// The script changed after it was applied.
    pub checksum_drift: bool,
}

/// Catalog versus ledger.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    /// One entry per catalog migration, in version order.
    pub entries: Vec<StatusEntry>,
    /// Ledger rows with no catalog entry.
    pub unknown: Vec<AppliedMigration>,
    /// Highest applied version.
    pub latest_version: Option<i64>,
}

impl StatusReport {
    /// Number of catalog entries with the given status.
    #[must_use]
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Whether any applied script has changed since.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(|e| e.checksum_drift)
    }

    /// Whether every catalog entry is applied.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status == MigrationStatus::Applied)
    }
}
