//! Migration configuration.

use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Database type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL database.
    #[default]
    PostgreSQL,
    /// SQLite database.
    SQLite,
}

impl DatabaseType {
    /// Parse from a database URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "postgresql"),
            Self::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Database type (auto-detected from the URL by the builder).
    #[serde(default)]
    pub database_type: DatabaseType,

    /// Schema holding the ledger table (PostgreSQL only).
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Ledger table name.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Timeout for acquiring a connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// How many times to try connecting before giving up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Back-off unit between connection attempts; attempt `n` waits `n` units.
    #[serde(with = "humantime_serde", default = "default_connect_backoff")]
    pub connect_backoff: Duration,

    /// Deadline for a single apply.
    #[serde(with = "humantime_serde", default = "default_migration_timeout")]
    pub migration_timeout: Duration,

    /// Maximum connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Fail when an applied migration's script no longer matches its ledger checksum.
    #[serde(default)]
    pub verify_checksums: bool,

    /// Apply any catalog version missing from the ledger, not only versions
    /// above the latest applied one.
    #[serde(default)]
    pub allow_out_of_order: bool,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table_name() -> String {
    "migrations".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_retries() -> u32 {
    20
}

fn default_connect_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_migration_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_connections() -> u32 {
    5
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_type: DatabaseType::PostgreSQL,
            schema: default_schema(),
            table_name: default_table_name(),
            connect_timeout: default_connect_timeout(),
            connect_retries: default_connect_retries(),
            connect_backoff: default_connect_backoff(),
            migration_timeout: default_migration_timeout(),
            max_connections: default_max_connections(),
            verify_checksums: false,
            allow_out_of_order: false,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder::new()
    }

    /// Build a configuration from environment variables.
    ///
    /// `DATABASE_URL` is required. `MIGRATIONS_SCHEMA`, `MIGRATIONS_TABLE`,
    /// `MIGRATIONS_TIMEOUT` (humantime, e.g. `5m`), `DB_CONNECT_RETRIES`,
    /// `MIGRATIONS_VERIFY_CHECKSUMS` and `MIGRATIONS_ALLOW_OUT_OF_ORDER`
    /// override the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with the database URL supplied by the caller.
    pub fn from_env_with_url(database_url: impl Into<String>) -> Result<Self> {
        let database_url = database_url.into();
        Self::from_lookup(|key| match key {
            "DATABASE_URL" => Some(database_url.clone()),
            _ => std::env::var(key).ok(),
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| MigrationError::config("DATABASE_URL is not set"))?;
        let mut builder = Self::builder().database_url(database_url);

        if let Some(schema) = lookup("MIGRATIONS_SCHEMA") {
            builder = builder.schema(schema);
        }
        if let Some(table) = lookup("MIGRATIONS_TABLE") {
            builder = builder.table_name(table);
        }
        if let Some(timeout) = lookup("MIGRATIONS_TIMEOUT") {
            let timeout = humantime::parse_duration(&timeout).map_err(|e| {
                MigrationError::config(format!("MIGRATIONS_TIMEOUT '{timeout}': {e}"))
            })?;
            builder = builder.migration_timeout(timeout);
        }
        if let Some(retries) = lookup("DB_CONNECT_RETRIES") {
            let retries = retries.parse().map_err(|e| {
                MigrationError::config(format!("DB_CONNECT_RETRIES '{retries}': {e}"))
            })?;
            builder = builder.connect_retries(retries);
        }
        if let Some(verify) = lookup("MIGRATIONS_VERIFY_CHECKSUMS") {
            builder = builder.verify_checksums(parse_flag("MIGRATIONS_VERIFY_CHECKSUMS", &verify)?);
        }
        if let Some(allow) = lookup("MIGRATIONS_ALLOW_OUT_OF_ORDER") {
            builder =
                builder.allow_out_of_order(parse_flag("MIGRATIONS_ALLOW_OUT_OF_ORDER", &allow)?);
        }

        builder.build()
    }

    /// Load a configuration file, YAML, TOML or JSON by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(MigrationError::config(format!(
                    "Unsupported config file format: {}",
                    path.display()
                )))
            }
        };

        if let Some(db_type) = DatabaseType::from_url(&config.database_url) {
            config.database_type = db_type;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(MigrationError::config("Database URL is required"));
        }

        if !is_identifier(&self.table_name) {
            return Err(MigrationError::config(format!(
                "Invalid ledger table name: '{}'",
                self.table_name
            )));
        }

        if !is_identifier(&self.schema) {
            return Err(MigrationError::config(format!(
                "Invalid schema name: '{}'",
                self.schema
            )));
        }

        if self.max_connections == 0 {
            return Err(MigrationError::config(
                "Max connections must be greater than 0",
            ));
        }

        if self.connect_retries == 0 {
            return Err(MigrationError::config(
                "Connect retries must be greater than 0",
            ));
        }

        if self.migration_timeout.is_zero() {
            return Err(MigrationError::config(
                "Migration timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the full ledger table name with schema.
    #[must_use]
    pub fn full_table_name(&self) -> String {
        match self.database_type {
            DatabaseType::PostgreSQL => format!("{}.{}", self.schema, self.table_name),
            DatabaseType::SQLite => self.table_name.clone(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MigrationError::config(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}

/// Builder for migration configuration.
#[derive(Debug, Default)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        // Auto-detect database type if possible
        if let Some(db_type) = DatabaseType::from_url(&url) {
            self.config.database_type = db_type;
        }
        self.config.database_url = url;
        self
    }

    /// Set the database type.
    #[must_use]
    pub fn database_type(mut self, db_type: DatabaseType) -> Self {
        self.config.database_type = db_type;
        self
    }

    /// Set the schema name.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = schema.into();
        self
    }

    /// Set the ledger table name.
    #[must_use]
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the number of connection attempts.
    #[must_use]
    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.config.connect_retries = retries;
        self
    }

    /// Set the back-off unit between connection attempts.
    #[must_use]
    pub fn connect_backoff(mut self, backoff: Duration) -> Self {
        self.config.connect_backoff = backoff;
        self
    }

    /// Set the migration timeout.
    #[must_use]
    pub fn migration_timeout(mut self, timeout: Duration) -> Self {
        self.config.migration_timeout = timeout;
        self
    }

    /// Set maximum connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Enable or disable checksum verification.
    #[must_use]
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    /// Allow out-of-order migrations.
    #[must_use]
    pub fn allow_out_of_order(mut self, allow: bool) -> Self {
        self.config.allow_out_of_order = allow;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<MigrationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
