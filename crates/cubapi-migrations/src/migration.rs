//! Migration types and the validated catalog.

use crate::checksum::checksum;
use crate::error::{MigrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Migration status as reported by [`Migrator::status`](crate::Migrator::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration has not been applied yet.
    Pending,
    /// Migration has a ledger row.
    Applied,
    /// Migration is below the latest applied version but has no ledger row,
    /// so the version cutoff will never select it.
    Skipped,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applied => write!(f, "applied"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A forward-only database migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Migration version. Unique across the catalog and never reused.
    pub version: i64,
    /// When the migration was written.
    pub authored_at: DateTime<Utc>,
    /// SQL script to apply.
    pub script: String,
    /// Free-text context for the change.
    pub description: String,
}

impl Migration {
    /// Create a new migration.
    #[must_use]
    pub fn new(version: i64, authored_at: DateTime<Utc>, script: impl Into<String>) -> Self {
        Self {
            version,
            authored_at,
            script: script.into(),
            description: String::new(),
        }
    }

    /// Create a migration builder.
    #[must_use]
    pub fn builder(version: i64) -> MigrationBuilder {
        MigrationBuilder::new(version)
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Checksum of the script.
    #[must_use]
    pub fn checksum(&self) -> String {
        checksum(&self.script)
    }

    /// Check the entry is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.version <= 0 {
            return Err(MigrationError::invalid(
                self.version,
                "version must be a positive integer",
            ));
        }
        if self.script.trim().is_empty() {
            return Err(MigrationError::invalid(self.version, "script is empty"));
        }
        Ok(())
    }

    /// Get a formatted version string.
    #[must_use]
    pub fn version_string(&self) -> String {
        format!("V{}", self.version)
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "V{}", self.version)
        } else {
            write!(f, "V{} - {}", self.version, self.description)
        }
    }
}

/// Builder for migrations.
#[derive(Debug)]
pub struct MigrationBuilder {
    version: i64,
    authored_at: Option<DateTime<Utc>>,
    script: Option<String>,
    description: String,
}

impl MigrationBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(version: i64) -> Self {
        Self {
            version,
            authored_at: None,
            script: None,
            description: String::new(),
        }
    }

    /// Set the authoring timestamp.
    #[must_use]
    pub fn authored_at(mut self, at: DateTime<Utc>) -> Self {
        self.authored_at = Some(at);
        self
    }

    /// Set the script.
    #[must_use]
    pub fn script(mut self, sql: impl Into<String>) -> Self {
        self.script = Some(sql.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build the migration.
    pub fn build(self) -> Result<Migration> {
        let script = self
            .script
            .ok_or_else(|| MigrationError::invalid(self.version, "script is required"))?;
        let authored_at = self
            .authored_at
            .ok_or_else(|| MigrationError::invalid(self.version, "authoring date is required"))?;

        let migration = Migration {
            version: self.version,
            authored_at,
            script,
            description: self.description,
        };
        migration.validate()?;
        Ok(migration)
    }
}

/// A row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Migration version.
    pub version: i64,
    /// SHA-256 of the script, hex encoded.
    pub checksum: String,
    /// When the migration was written.
    pub date_created: DateTime<Utc>,
    /// When the migration was applied.
    pub date_applied: DateTime<Utc>,
    /// Description copied from the migration.
    pub description: String,
}

impl AppliedMigration {
    /// Ledger row for `migration`, applied at `date_applied`.
    #[must_use]
    pub fn new(migration: &Migration, date_applied: DateTime<Utc>) -> Self {
        Self {
            version: migration.version,
            checksum: migration.checksum(),
            date_created: migration.authored_at,
            date_applied,
            description: migration.description.clone(),
        }
    }

    /// Check if the recorded checksum matches the migration's current script.
    #[must_use]
    pub fn matches(&self, migration: &Migration) -> bool {
        self.version == migration.version && self.checksum == migration.checksum()
    }
}

impl fmt::Display for AppliedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V{} applied {}",
            self.version,
            self.date_applied.to_rfc3339()
        )
    }
}

/// The ordered set of migrations an application ships.
///
/// Construction sorts a copy of the input by version and rejects duplicate
/// versions and malformed entries, so a `Catalog` is always safe to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    migrations: Vec<Migration>,
}

impl Catalog {
    /// Validate and sort `migrations`.
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut migrations: Vec<Migration> = migrations.into_iter().collect();
        migrations.sort_by_key(|m| m.version);

        let mut seen = HashSet::with_capacity(migrations.len());
        for migration in &migrations {
            if !seen.insert(migration.version) {
                return Err(MigrationError::DuplicateVersion {
                    version: migration.version,
                });
            }
            migration.validate()?;
        }

        Ok(Self { migrations })
    }

    /// Migrations in ascending version order.
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Look up a migration by version.
    #[must_use]
    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Highest version in the catalog.
    #[must_use]
    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version)
    }

    /// Migrations with a version strictly greater than `latest`.
    #[must_use]
    pub fn after(&self, latest: Option<i64>) -> Vec<&Migration> {
        match latest {
            None => self.migrations.iter().collect(),
            Some(latest) => self
                .migrations
                .iter()
                .filter(|m| m.version > latest)
                .collect(),
        }
    }

    /// Number of migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}
