//! # cubapi Migrations
//!
//! Forward-only schema migrations for the cubapi services.
//!
//! This crate provides:
//! - Versioned migrations applied in ascending order, exactly once
//! - One transaction per apply: every pending migration lands, or none does
//! - A ledger table recording version, checksum and timestamps
//! - Support for PostgreSQL and SQLite
//!
//! ## Example
//!
//! ```rust,no_run
//! use cubapi_migrations::{catalog, MigrationConfig, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::builder()
//!         .database_url("postgres://localhost/autocrat")
//!         .build()?;
//!
//!     let migrator = Migrator::new(config).await?;
//!     migrator.apply(catalog::all_migrations()).await?;
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod migrator;
pub mod pool;

pub use checksum::checksum;
pub use config::{DatabaseType, MigrationConfig, MigrationConfigBuilder};
pub use error::{FailurePhase, MigrationError, Result};
pub use ledger::LedgerStore;
pub use migration::{AppliedMigration, Catalog, Migration, MigrationBuilder, MigrationStatus};
pub use migrator::{Migrator, StatusEntry, StatusReport};
pub use pool::{DatabasePool, PoolStats};

/// Re-export sqlx types for convenience
pub use sqlx;
