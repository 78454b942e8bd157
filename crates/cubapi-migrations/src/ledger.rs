//! The ledger table recording applied migrations.

use crate::config::{DatabaseType, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::migration::AppliedMigration;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyRow;
use sqlx::{Any, Executor, Row};
use tracing::debug;

/// Owner of the ledger table's schema and all reads and writes to it.
///
/// Every method takes the executor to run against, so the same store serves
/// pool-level bootstrap reads and inserts inside the batch transaction.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    database_type: DatabaseType,
    schema: String,
    table: String,
}

impl LedgerStore {
    /// Ledger store described by `config`.
    #[must_use]
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            database_type: config.database_type,
            schema: config.schema.clone(),
            table: config.full_table_name(),
        }
    }

    /// Qualified ledger table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn init_sql(&self) -> String {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                version      BIGINT      PRIMARY KEY,
                checksum     VARCHAR(64) NOT NULL,
                date_created TEXT        NOT NULL,
                date_applied TEXT        NOT NULL,
                description  TEXT        NOT NULL
            );
            "#,
            table = self.table,
        );

        match self.database_type {
            DatabaseType::PostgreSQL => format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};\n{create_table}",
                schema = self.schema,
            ),
            DatabaseType::SQLite => create_table,
        }
    }

    /// Create the ledger table if it does not exist. Never touches existing rows.
    pub async fn ensure_initialized<'c, E>(&self, executor: E) -> Result<()>
    where
        E: Executor<'c, Database = Any>,
    {
        let sql = self.init_sql();
        executor
            .execute(sql.as_str())
            .await
            .map_err(MigrationError::Bootstrap)?;

        debug!(table = %self.table, "Migration ledger initialised");
        Ok(())
    }

    /// The row with the highest version, or `None` when the ledger is empty.
    pub async fn latest_applied<'c, E>(&self, executor: E) -> Result<Option<AppliedMigration>>
    where
        E: Executor<'c, Database = Any>,
    {
        let sql = format!(
            "SELECT version, checksum, date_created, date_applied, description
             FROM {}
             ORDER BY version DESC
             LIMIT 1",
            self.table
        );

        let row = sqlx::query(&sql)
            .fetch_optional(executor)
            .await
            .map_err(MigrationError::LedgerRead)?;

        row.as_ref().map(decode_row).transpose()
    }

    /// The most recent `date_applied` in the ledger, whatever its version.
    ///
    /// Differs from the latest version's stamp once versions have been applied
    /// out of order.
    pub async fn last_applied_at<'c, E>(&self, executor: E) -> Result<Option<DateTime<Utc>>>
    where
        E: Executor<'c, Database = Any>,
    {
        let sql = format!(
            "SELECT version, date_applied
             FROM {}
             ORDER BY date_applied DESC
             LIMIT 1",
            self.table
        );

        let row = sqlx::query(&sql)
            .fetch_optional(executor)
            .await
            .map_err(MigrationError::LedgerRead)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version").map_err(MigrationError::LedgerRead)?;
        let date_applied: String = row
            .try_get("date_applied")
            .map_err(MigrationError::LedgerRead)?;
        parse_timestamp(version, "date_applied", &date_applied).map(Some)
    }

    /// Every ledger row, ordered by version.
    pub async fn applied<'c, E>(&self, executor: E) -> Result<Vec<AppliedMigration>>
    where
        E: Executor<'c, Database = Any>,
    {
        let sql = format!(
            "SELECT version, checksum, date_created, date_applied, description
             FROM {}
             ORDER BY version",
            self.table
        );

        let rows = sqlx::query(&sql)
            .fetch_all(executor)
            .await
            .map_err(MigrationError::LedgerRead)?;

        rows.iter().map(decode_row).collect()
    }

    /// Insert one ledger row. Fails if the version is already recorded.
    pub async fn record_applied<'c, E>(&self, executor: E, record: &AppliedMigration) -> Result<()>
    where
        E: Executor<'c, Database = Any>,
    {
        let sql = format!(
            "INSERT INTO {} (version, checksum, date_created, date_applied, description)
             VALUES ($1, $2, $3, $4, $5)",
            self.table
        );

        sqlx::query(&sql)
            .bind(record.version)
            .bind(&record.checksum)
            .bind(format_timestamp(record.date_created))
            .bind(format_timestamp(record.date_applied))
            .bind(&record.description)
            .execute(executor)
            .await
            .map_err(|source| MigrationError::Record {
                version: record.version,
                source,
            })?;

        Ok(())
    }
}

/// Ledger timestamps are RFC 3339 UTC with microseconds, so text order is time order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(version: i64, column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MigrationError::CorruptLedger {
            version,
            reason: format!("{column} '{value}': {e}"),
        })
}

fn decode_row(row: &AnyRow) -> Result<AppliedMigration> {
    let version: i64 = row.try_get("version").map_err(MigrationError::LedgerRead)?;
    let checksum: String = row.try_get("checksum").map_err(MigrationError::LedgerRead)?;
    let date_created: String = row
        .try_get("date_created")
        .map_err(MigrationError::LedgerRead)?;
    let date_applied: String = row
        .try_get("date_applied")
        .map_err(MigrationError::LedgerRead)?;
    let description: String = row
        .try_get("description")
        .map_err(MigrationError::LedgerRead)?;

    Ok(AppliedMigration {
        version,
        checksum: checksum.trim_end().to_string(),
        date_created: parse_timestamp(version, "date_created", &date_created)?,
        date_applied: parse_timestamp(version, "date_applied", &date_applied)?,
        description,
    })
}
