//! Status reports.

use crate::fixtures::*;
use crate::helpers::*;
use cubapi_migrations::MigrationStatus;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_status_fresh_database() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let report = migrator.status(sample_catalog()).await.unwrap();

    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.count(MigrationStatus::Pending), 4);
    assert_eq!(report.latest_version, None);
    assert!(report.unknown.is_empty());
    assert!(!report.is_up_to_date());
    // Status bootstraps the ledger but runs nothing.
    assert!(table_exists(&migrator, "migrations").await);
    assert!(!table_exists(&migrator, "users").await);
}

#[tokio::test]
async fn test_status_partial_history() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_prefix(2)).await.unwrap();
    let report = migrator.status(sample_catalog()).await.unwrap();

    let statuses: Vec<MigrationStatus> = report.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            MigrationStatus::Applied,
            MigrationStatus::Applied,
            MigrationStatus::Pending,
            MigrationStatus::Pending,
        ]
    );
    assert_eq!(report.latest_version, Some(2));
    assert!(report.entries[0].record.is_some());
    assert!(report.entries[2].record.is_none());
}

#[tokio::test]
async fn test_status_up_to_date() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_catalog()).await.unwrap();
    let report = migrator.status(sample_catalog()).await.unwrap();

    assert!(report.is_up_to_date());
    assert!(!report.has_drift());
    assert_eq!(report.latest_version, Some(4));
}

#[tokio::test]
async fn test_status_lists_unknown_ledger_rows() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_catalog()).await.unwrap();

    // An older build that only knows the first two migrations.
    let report = migrator.status(sample_prefix(2)).await.unwrap();

    assert!(report.is_up_to_date());
    let unknown: Vec<i64> = report.unknown.iter().map(|r| r.version).collect();
    assert_eq!(unknown, vec![3, 4]);
    assert_eq!(report.latest_version, Some(4));
}
