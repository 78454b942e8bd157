//! Migration error types.

use std::fmt;
use std::time::Duration;

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Stage of an `apply` call at which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Reaching the database at all.
    Connection,
    /// Loading or validating configuration.
    Configuration,
    /// Creating or reading the ledger table.
    Bootstrap,
    /// Catalog validation, before any transaction is opened.
    Validation,
    /// Running a script or recording it in the ledger.
    Execution,
    /// Committing the batch transaction.
    Commit,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Configuration => write!(f, "configuration"),
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Validation => write!(f, "validation"),
            Self::Execution => write!(f, "execution"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Migration error type.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The database could not be reached.
    #[error("Database connection failed after {attempts} attempt(s): {source}")]
    Connection {
        /// Attempts made before giving up.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: sqlx::Error,
    },

    /// The ledger table could not be created.
    #[error("Failed to initialise database for migrator: {0}")]
    Bootstrap(#[source] sqlx::Error),

    /// The ledger table could not be read.
    #[error("Failed to read the migration ledger: {0}")]
    LedgerRead(#[source] sqlx::Error),

    /// A ledger row could not be decoded.
    #[error("Corrupt ledger row for migration {version}: {reason}")]
    CorruptLedger {
        /// Version of the offending row.
        version: i64,
        /// What could not be decoded.
        reason: String,
    },

    /// Two catalog entries share a version.
    #[error("Duplicate migration version {version} in catalog")]
    DuplicateVersion {
        /// The repeated version.
        version: i64,
    },

    /// A catalog entry is malformed.
    #[error("Invalid migration {version}: {reason}")]
    InvalidMigration {
        /// Migration version.
        version: i64,
        /// Why the entry was rejected.
        reason: String,
    },

    /// An applied migration's script no longer matches its recorded checksum.
    #[error("Checksum mismatch for migration {version}: recorded {recorded}, catalog has {current}")]
    ChecksumMismatch {
        /// Migration version.
        version: i64,
        /// Checksum stored in the ledger.
        recorded: String,
        /// Checksum of the script in the catalog.
        current: String,
    },

    /// The batch transaction could not be opened.
    #[error("Failed to begin migration transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// A migration script failed.
    #[error("Failed to apply migration version {version}: {source}")]
    Execution {
        /// Migration version.
        version: i64,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// A ledger row could not be inserted.
    #[error("Failed to mark migration version {version} as applied: {source}")]
    Record {
        /// Migration version.
        version: i64,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The batch transaction could not be committed.
    #[error("Failed to commit migration transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// A raw schema script failed.
    #[error("Failed to apply schema: {0}")]
    Schema(#[source] sqlx::Error),

    /// The caller's cancellation signal fired.
    #[error("Migration cancelled")]
    Cancelled,

    /// The migration deadline elapsed.
    #[error("Migration timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MigrationError {
    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid(version: i64, reason: impl Into<String>) -> Self {
        Self::InvalidMigration {
            version,
            reason: reason.into(),
        }
    }

    /// The version of the migration the error is about, if any.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::CorruptLedger { version, .. }
            | Self::DuplicateVersion { version }
            | Self::InvalidMigration { version, .. }
            | Self::ChecksumMismatch { version, .. }
            | Self::Execution { version, .. }
            | Self::Record { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Where in the apply sequence the error occurred.
    #[must_use]
    pub fn phase(&self) -> FailurePhase {
        match self {
            Self::Connection { .. } => FailurePhase::Connection,
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) => FailurePhase::Configuration,
            Self::Bootstrap(_) | Self::LedgerRead(_) | Self::CorruptLedger { .. } => {
                FailurePhase::Bootstrap
            }
            Self::DuplicateVersion { .. }
            | Self::InvalidMigration { .. }
            | Self::ChecksumMismatch { .. } => FailurePhase::Validation,
            Self::Begin(_)
            | Self::Execution { .. }
            | Self::Record { .. }
            | Self::Schema(_)
            | Self::Cancelled
            | Self::Timeout(_) => FailurePhase::Execution,
            Self::Commit(_) => FailurePhase::Commit,
        }
    }

    /// Check if the error is retryable.
    ///
    /// Only failures to reach the database qualify. Script errors never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Begin(_))
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigrationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
