//! Migrate command - database migration management.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use cubapi_migrations::{
    catalog, AppliedMigration, Catalog, DatabaseType, Migration, MigrationConfig, MigrationStatus,
    Migrator, StatusReport,
};
use serde::Serialize;

use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the migrate command.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateCommand,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Migration config file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Migrate subcommands.
#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// Apply all pending migrations in one transaction
    Run(RunArgs),

    /// Show migration status
    Status(StatusArgs),

    /// Check the catalog, and the ledger when a database is configured
    Validate,

    /// List the migrations this build ships
    Info,
}

/// Arguments for migrate run.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dry run - show what would be applied
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for migrate status.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show all migrations (including applied)
    #[arg(long)]
    pub all: bool,
}

/// Migration status output.
#[derive(Debug, Serialize)]
pub struct MigrationStatusOutput {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
    pub skipped: usize,
    pub latest_version: Option<i64>,
    pub checksum_drift: bool,
    pub migrations: Vec<MigrationInfo>,
    pub unknown: Vec<MigrationInfo>,
}

/// Individual migration info.
#[derive(Debug, Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub status: MigrationStatus,
    pub checksum: String,
    pub authored_at: String,
    pub applied_at: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub checksum_drift: bool,
}

impl MigrationInfo {
    fn pending(migration: &Migration) -> Self {
        Self {
            version: migration.version,
            description: migration.description.clone(),
            status: MigrationStatus::Pending,
            checksum: migration.checksum(),
            authored_at: migration.authored_at.to_rfc3339(),
            applied_at: None,
            checksum_drift: false,
        }
    }

    fn applied(record: &AppliedMigration) -> Self {
        Self {
            version: record.version,
            description: record.description.clone(),
            status: MigrationStatus::Applied,
            checksum: record.checksum.clone(),
            authored_at: record.date_created.to_rfc3339(),
            applied_at: Some(record.date_applied.to_rfc3339()),
            checksum_drift: false,
        }
    }
}

/// Execute the migrate command.
pub async fn execute(args: MigrateArgs, json: bool) -> Result<()> {
    let format = OutputFormat::from_json_flag(json);

    let config = resolve_config(args.database_url.as_deref(), args.config.as_deref())?;

    // Commands that don't need a database
    match args.command {
        MigrateCommand::Info => return execute_info(format),
        MigrateCommand::Validate => return execute_validate(config, format).await,
        MigrateCommand::Run(_) | MigrateCommand::Status(_) => {}
    }

    let Some(config) = config else {
        let result: CommandResult<()> = CommandResult::failure(
            "DATABASE_URL environment variable, --database-url or --config required",
        );
        result.print(format)?;
        return Err(anyhow!("no database configured"));
    };

    match args.command {
        MigrateCommand::Run(run_args) => execute_run(config, run_args, format).await,
        MigrateCommand::Status(status_args) => execute_status(config, status_args, format).await,
        MigrateCommand::Validate | MigrateCommand::Info => Ok(()),
    }
}

/// Build the configuration from a file, the environment, or both.
///
/// A URL from the flag or `DATABASE_URL` overrides the one in the file.
fn resolve_config(
    database_url: Option<&str>,
    config_path: Option<&Path>,
) -> Result<Option<MigrationConfig>> {
    let config = match (config_path, database_url) {
        (Some(path), url) => {
            let mut config = MigrationConfig::from_file(path)
                .map_err(|e| anyhow!("Configuration error in {}: {}", path.display(), e))?;
            if let Some(url) = url {
                config.database_url = url.to_string();
                if let Some(db_type) = DatabaseType::from_url(url) {
                    config.database_type = db_type;
                }
                config
                    .validate()
                    .map_err(|e| anyhow!("Configuration error: {}", e))?;
            }
            Some(config)
        }
        (None, Some(url)) => Some(
            MigrationConfig::from_env_with_url(url)
                .map_err(|e| anyhow!("Configuration error: {}", e))?,
        ),
        (None, None) => None,
    };
    Ok(config)
}

async fn connect(config: MigrationConfig) -> Result<Migrator> {
    tracing::debug!(database_type = %config.database_type, table = %config.full_table_name(), "Connecting");
    Migrator::new(config)
        .await
        .map_err(|e| anyhow!("Failed to connect: {}", e))
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Execute migrate run.
async fn execute_run(config: MigrationConfig, args: RunArgs, format: OutputFormat) -> Result<()> {
    let migrator = connect(config).await?;

    if args.dry_run {
        let pending = migrator
            .plan(catalog::all_migrations())
            .await
            .map_err(|e| anyhow!("Failed to get pending: {}", e))?;

        match format {
            OutputFormat::Json => {
                let migrations: Vec<_> = pending.iter().map(MigrationInfo::pending).collect();
                let result = CommandResult::success(serde_json::json!({
                    "dry_run": true,
                    "pending_count": pending.len(),
                    "migrations": migrations,
                }));
                result.print(format)?;
            }
            OutputFormat::Text => {
                output::info(&format!(
                    "Dry run - {} migration(s) would be applied:",
                    pending.len()
                ));
                for m in &pending {
                    output::key_value(&m.version_string(), &m.description);
                }
            }
        }
        return Ok(());
    }

    let results = migrator
        .apply_until(catalog::all_migrations(), shutdown_signal())
        .await
        .map_err(|e| anyhow!("Migrations failed during {} phase: {}", e.phase(), e))?;

    match format {
        OutputFormat::Json => {
            let migrations: Vec<_> = results.iter().map(MigrationInfo::applied).collect();
            let result = CommandResult::success(serde_json::json!({
                "applied_count": results.len(),
                "migrations": migrations,
            }));
            result.print(format)?;
        }
        OutputFormat::Text => {
            if results.is_empty() {
                output::success("No pending migrations");
            } else {
                output::success(&format!("Applied {} migration(s)", results.len()));
                for r in &results {
                    output::key_value(
                        &format!("V{}", r.version),
                        &format!("{} ({})", r.description, output::format_timestamp(&r.date_applied)),
                    );
                }
            }
        }
    }

    Ok(())
}

fn status_output(report: &StatusReport, all: bool) -> MigrationStatusOutput {
    let migrations = report
        .entries
        .iter()
        .filter(|e| all || e.status != MigrationStatus::Applied || e.checksum_drift)
        .map(|e| {
            let mut info = match e.record {
                Some(ref record) => MigrationInfo::applied(record),
                None => MigrationInfo::pending(&e.migration),
            };
            info.status = e.status;
            info.description = e.migration.description.clone();
            info.checksum_drift = e.checksum_drift;
            info
        })
        .collect();

    MigrationStatusOutput {
        total: report.entries.len(),
        applied: report.count(MigrationStatus::Applied),
        pending: report.count(MigrationStatus::Pending),
        skipped: report.count(MigrationStatus::Skipped),
        latest_version: report.latest_version,
        checksum_drift: report.has_drift(),
        migrations,
        unknown: report.unknown.iter().map(MigrationInfo::applied).collect(),
    }
}

/// Execute migrate status.
async fn execute_status(
    config: MigrationConfig,
    args: StatusArgs,
    format: OutputFormat,
) -> Result<()> {
    let migrator = connect(config).await?;

    let report = migrator
        .status(catalog::all_migrations())
        .await
        .map_err(|e| anyhow!("Failed to get status: {}", e))?;
    let status = status_output(&report, args.all);

    match format {
        OutputFormat::Json => {
            CommandResult::success(status).print(format)?;
        }
        OutputFormat::Text => {
            output::section("Migration Status");
            output::key_value("Total", &status.total.to_string());
            output::key_value("Applied", &status.applied.to_string());
            output::key_value("Pending", &status.pending.to_string());
            if status.skipped > 0 {
                output::key_value("Skipped", &status.skipped.to_string());
            }
            output::key_value(
                "Latest",
                &status
                    .latest_version
                    .map_or_else(|| "none".to_string(), |v| format!("V{v}")),
            );

            if !status.migrations.is_empty() {
                println!();
                output::section(if args.all { "All Migrations" } else { "Outstanding Migrations" });
                for m in &status.migrations {
                    println!(
                        "  {} V{} - {}",
                        output::status_marker(m.status, m.checksum_drift),
                        m.version,
                        m.description
                    );
                    if let Some(ref at) = m.applied_at {
                        println!("      Applied: {at}");
                    }
                    if m.checksum_drift {
                        println!("      Script changed since it was applied");
                    }
                }
            }

            if !status.unknown.is_empty() {
                output::warning(&format!(
                    "{} applied migration(s) are not in this build's catalog",
                    status.unknown.len()
                ));
                for m in &status.unknown {
                    println!("  ? V{} - {}", m.version, m.description);
                }
            }
        }
    }

    Ok(())
}

/// Problems `validate` reports against a ledger.
fn ledger_issues(report: &StatusReport) -> Vec<String> {
    let mut issues = Vec::new();
    for entry in &report.entries {
        if entry.checksum_drift {
            let recorded = entry
                .record
                .as_ref()
                .map_or("", |r| output::short_checksum(&r.checksum))
                .to_string();
            issues.push(format!(
                "V{} changed since it was applied (recorded {}, current {})",
                entry.migration.version,
                recorded,
                output::short_checksum(&entry.migration.checksum())
            ));
        }
        if entry.status == MigrationStatus::Skipped {
            issues.push(format!(
                "V{} is below the latest applied version and will not be applied",
                entry.migration.version
            ));
        }
    }
    for record in &report.unknown {
        issues.push(format!(
            "V{} is recorded in the ledger but missing from the catalog",
            record.version
        ));
    }
    issues
}

/// Execute migrate validate.
async fn execute_validate(config: Option<MigrationConfig>, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checked_ledger = false;

    match Catalog::new(catalog::all_migrations()) {
        Err(e) => issues.push(e.to_string()),
        Ok(_) => {
            if let Some(config) = config {
                let migrator = connect(config).await?;
                let report = migrator
                    .status(catalog::all_migrations())
                    .await
                    .map_err(|e| anyhow!("Validation failed: {}", e))?;
                issues.extend(ledger_issues(&report));
                checked_ledger = true;
            }
        }
    }

    match format {
        OutputFormat::Json => {
            let data = serde_json::json!({
                "valid": issues.is_empty(),
                "checked_ledger": checked_ledger,
                "issues": issues,
            });
            let result = if issues.is_empty() {
                CommandResult::success(data)
            } else {
                CommandResult::failure("Validation failed").with_data(data)
            };
            result.print(format)?;
        }
        OutputFormat::Text => {
            if issues.is_empty() {
                output::success("All migrations are valid");
            } else {
                output::error(&format!("Found {} validation issue(s):", issues.len()));
                for issue in &issues {
                    output::error(&format!("  - {issue}"));
                }
            }
            if !checked_ledger {
                output::info("No database configured; checked the catalog only");
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} validation issue(s)", issues.len()))
    }
}

/// Execute migrate info.
fn execute_info(format: OutputFormat) -> Result<()> {
    let migrations = catalog::all_migrations();

    match format {
        OutputFormat::Json => {
            let info: Vec<_> = migrations
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "version": m.version,
                        "description": m.description,
                        "authored_at": m.authored_at.to_rfc3339(),
                        "checksum": m.checksum(),
                    })
                })
                .collect();

            let result = CommandResult::success(serde_json::json!({
                "total_migrations": migrations.len(),
                "migrations": info,
            }));
            result.print(format)?;
        }
        OutputFormat::Text => {
            output::section("Available Migrations");
            output::key_value("Total", &migrations.len().to_string());
            println!();

            for m in &migrations {
                println!("  {m}");
                println!(
                    "      Authored: {}  Checksum: {}",
                    output::format_timestamp(&m.authored_at),
                    output::short_checksum(&m.checksum())
                );
            }
        }
    }

    Ok(())
}
