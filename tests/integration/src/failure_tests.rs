//! A failing batch leaves nothing behind.

use crate::fixtures::*;
use crate::helpers::*;
use cubapi_migrations::{FailurePhase, Migration, MigrationError};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_failure_rolls_back_whole_batch() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let catalog = vec![
        create_table(1, "first"),
        broken(2),
        create_table(3, "third"),
    ];

    let err = migrator.apply(catalog).await.unwrap_err();
    assert!(matches!(err, MigrationError::Execution { version: 2, .. }));
    assert_eq!(err.phase(), FailurePhase::Execution);
    assert_eq!(err.version(), Some(2));

    assert!(!table_exists(&migrator, "first").await);
    assert!(!table_exists(&migrator, "third").await);
    // The ledger itself survives; it was created before the batch began.
    assert!(table_exists(&migrator, "migrations").await);
    assert!(ledger_versions(&migrator).await.is_empty());
}

#[tokio::test]
async fn test_failure_keeps_earlier_batches() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(vec![create_table(1, "first")]).await.unwrap();

    let err = migrator
        .apply(vec![
            create_table(1, "first"),
            create_table(2, "second"),
            broken(3),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.version(), Some(3));

    assert!(table_exists(&migrator, "first").await);
    assert!(!table_exists(&migrator, "second").await);
    assert_eq!(ledger_versions(&migrator).await, vec![1]);
}

#[tokio::test]
async fn test_retry_after_fix_applies_everything() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let mut catalog = sample_prefix(2);
    catalog.push(broken(3));
    assert!(migrator.apply(catalog).await.is_err());

    let applied = migrator.apply(sample_catalog()).await.unwrap();
    assert_eq!(applied.len(), 4);
}

#[tokio::test]
async fn test_duplicate_versions_rejected_before_database_work() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let err = migrator
        .apply(vec![
            create_table(1, "first"),
            create_table(2, "second"),
            create_table(2, "again"),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::DuplicateVersion { version: 2 }));
    assert_eq!(err.phase(), FailurePhase::Validation);
    // Validation happens before bootstrap.
    assert!(!table_exists(&migrator, "migrations").await);
    assert!(!table_exists(&migrator, "first").await);
}

#[tokio::test]
async fn test_malformed_entries_rejected() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let err = migrator
        .apply(vec![Migration::new(0, authored(1), "CREATE TABLE zero (id INT);")])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::InvalidMigration { version: 0, .. }));

    let err = migrator
        .apply(vec![Migration::new(1, authored(1), "   ")])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::InvalidMigration { version: 1, .. }));

    assert!(!table_exists(&migrator, "migrations").await);
}

#[tokio::test]
async fn test_ledger_conflict_rolls_back() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    // The script claims its own ledger row, so recording it hits the primary key.
    let sneaky = Migration::new(
        2,
        authored(2),
        "CREATE TABLE sneaky (id INTEGER PRIMARY KEY);
         INSERT INTO migrations (version, checksum, date_created, date_applied, description)
         VALUES (2, 'x', 'x', 'x', 'x');",
    );

    let err = migrator
        .apply(vec![create_table(1, "first"), sneaky])
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Record { version: 2, .. }));
    assert_eq!(err.phase(), FailurePhase::Execution);
    assert!(!table_exists(&migrator, "first").await);
    assert!(!table_exists(&migrator, "sneaky").await);
    assert!(ledger_versions(&migrator).await.is_empty());
}

#[tokio::test]
async fn test_corrupt_ledger_row_is_reported() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator
        .apply_schema(
            "CREATE TABLE migrations (
                version      BIGINT      PRIMARY KEY,
                checksum     VARCHAR(64) NOT NULL,
                date_created TEXT        NOT NULL,
                date_applied TEXT        NOT NULL,
                description  TEXT        NOT NULL
            );
            INSERT INTO migrations VALUES (7, 'abc', 'yesterday', 'today', 'hand edited');",
        )
        .await
        .unwrap();

    let err = migrator.apply(sample_catalog()).await.unwrap_err();
    assert!(matches!(err, MigrationError::CorruptLedger { version: 7, .. }));
    assert!(!table_exists(&migrator, "users").await);
}
